//! Performance benchmarks for brisk

use brisk::bundle::optimizer::{compress, Algorithm, CompressOptions};
use brisk::bundle::{Bundler, OptimizeKind, Optimizer, OptimizerOptions, PluginManager};
use brisk::BuildConfig;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use tempfile::TempDir;

const SAMPLE_JS: &str = r#"
import { render } from './view.js';

export function createStore(initial) {
  let state = { ...initial };
  const listeners = new Set();
  return {
    get() { return state; },
    set(next) {
      state = { ...state, ...next };
      listeners.forEach((listener) => listener(state));
    },
    subscribe(listener) {
      listeners.add(listener);
      return () => listeners.delete(listener);
    },
  };
}

const store = createStore({ count: 0, label: "clicks" });
store.subscribe((state) => render(`${state.label}: ${state.count}`));
for (let i = 0; i < 10; i++) {
  store.set({ count: store.get().count + 1 });
}
"#;

fn sample_source(copies: usize) -> String {
    SAMPLE_JS.repeat(copies)
}

fn benchmark_js_minify(c: &mut Criterion) {
    let optimizer = Optimizer::new(OptimizerOptions::default());
    let source = sample_source(50);

    c.bench_function("minify_js", |b| {
        b.iter(|| {
            optimizer.minify(black_box(&source), OptimizeKind::Js);
        })
    });
}

fn benchmark_compression(c: &mut Criterion) {
    let source = sample_source(50).into_bytes();

    c.bench_function("gzip_default_level", |b| {
        b.iter(|| {
            compress(black_box(&source), CompressOptions::new(Algorithm::Gzip)).unwrap();
        })
    });
    c.bench_function("brotli_default_level", |b| {
        b.iter(|| {
            compress(black_box(&source), CompressOptions::new(Algorithm::Brotli)).unwrap();
        })
    });
}

fn sample_project(modules: usize) -> TempDir {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(&src).unwrap();

    let mut index = String::new();
    for i in 0..modules {
        fs::write(
            src.join(format!("mod{}.js", i)),
            format!("export function value{i}() {{ return {i} * 2; }}\nexport const unused{i} = {i};\n"),
        )
        .unwrap();
        index.push_str(&format!("import {{ value{i} }} from './mod{i}.js';\nconsole.log(value{i}());\n"));
    }
    fs::write(src.join("index.js"), index).unwrap();
    temp
}

fn benchmark_full_build(c: &mut Criterion) {
    let temp = sample_project(100);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("build_100_modules", |b| {
        b.iter(|| {
            let config = BuildConfig::from_yaml_str("entry: src/index.js\nminify: true\n", temp.path().to_path_buf()).unwrap();
            let mut bundler = Bundler::new(config, PluginManager::new()).unwrap();
            runtime.block_on(bundler.build()).unwrap();
        })
    });
}

fn benchmark_incremental_rebuild(c: &mut Criterion) {
    let temp = sample_project(100);
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = BuildConfig::from_yaml_str("entry: src/index.js\n", temp.path().to_path_buf()).unwrap();
    let mut bundler = Bundler::new(config, PluginManager::new()).unwrap();
    runtime.block_on(bundler.build()).unwrap();
    let changed = vec![temp.path().join("src/mod7.js")];

    c.bench_function("rebuild_one_module", |b| {
        b.iter(|| {
            runtime.block_on(bundler.rebuild(black_box(&changed))).unwrap();
        })
    });
}

criterion_group!(
    benches,
    benchmark_js_minify,
    benchmark_compression,
    benchmark_full_build,
    benchmark_incremental_rebuild
);
criterion_main!(benches);
