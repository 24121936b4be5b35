//! Module registry shipped at the top of every chunk.
//!
//! The registry lives on `globalThis` so chunks loaded later (shared and
//! dynamic chunks, HMR re-imports) register into the same module table.

/// Name of the registry binding inside chunks
pub const RUNTIME_BINDING: &str = "__brisk";

const RUNTIME: &str = r#"var __brisk = globalThis.__brisk_runtime__ || (globalThis.__brisk_runtime__ = (function () {
  var factories = {}, cache = {}, externals = {}, chunks = {}, loading = {}, hot = {};
  var runtime = { hmr: false, loader: null, chunks: chunks };

  function define(id, factory) {
    factories[id] = factory;
  }

  function external(specifier, value) {
    externals[specifier] = value;
  }

  function require(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    if (Object.prototype.hasOwnProperty.call(externals, id)) return externals[id];
    var factory = factories[id];
    if (!factory) throw new Error("[brisk] module not found: " + id);
    var module = { id: id, exports: {} };
    if (runtime.hmr) module.hot = hotContext(id);
    cache[id] = module;
    try {
      factory.call(module.exports, module, module.exports, require, load);
    } catch (e) {
      delete cache[id];
      throw e;
    }
    return module.exports;
  }

  function loadChunk(file) {
    if (!loading[file]) {
      if (!runtime.loader) return Promise.reject(new Error("[brisk] no chunk loader for " + file));
      loading[file] = Promise.resolve(runtime.loader(file));
    }
    return loading[file];
  }

  function load(id) {
    var files = chunks[id] || [];
    return Promise.all(files.map(loadChunk)).then(function () {
      return interop(require(id));
    });
  }

  function interop(exports) {
    if (exports && exports.__esModule) return exports;
    var ns = { default: exports };
    if (exports && typeof exports === "object") {
      Object.keys(exports).forEach(function (key) {
        if (key !== "default") ns[key] = exports[key];
      });
    }
    return ns;
  }

  function exportAll(exports, getters) {
    if (!exports.__esModule) Object.defineProperty(exports, "__esModule", { value: true });
    Object.keys(getters).forEach(function (name) {
      Object.defineProperty(exports, name, { enumerable: true, configurable: true, get: getters[name] });
    });
  }

  function reexport(exports, source) {
    if (!exports.__esModule) Object.defineProperty(exports, "__esModule", { value: true });
    Object.keys(source).forEach(function (name) {
      if (name === "default" || Object.prototype.hasOwnProperty.call(exports, name)) return;
      Object.defineProperty(exports, name, { enumerable: true, get: function () { return source[name]; } });
    });
  }

  function hotContext(id) {
    var record = hot[id] || (hot[id] = { accept: [], dispose: [], data: undefined });
    record.accept = [];
    record.dispose = [];
    return {
      data: record.data,
      accept: function (deps, callback) {
        record.accept.push(typeof deps === "function" ? deps : callback || function () {});
      },
      dispose: function (callback) {
        record.dispose.push(callback);
      },
      invalidate: function () {
        location.reload();
      }
    };
  }

  // Re-run stale modules after their chunk was re-imported.
  // Returns false when the update cannot be applied in place.
  function hotApply(ids) {
    for (var i = 0; i < ids.length; i++) {
      if (!factories[ids[i]]) return false;
    }
    ids.forEach(function (id) {
      var record = hot[id];
      if (record) {
        var data = {};
        record.dispose.forEach(function (callback) { callback(data); });
        record.data = data;
      }
      delete cache[id];
    });
    ids.forEach(function (id) {
      require(id);
    });
    ids.forEach(function (id) {
      var record = hot[id];
      if (record) record.accept.forEach(function (callback) { callback(cache[id] && cache[id].exports); });
    });
    return true;
  }

  runtime.define = define;
  runtime.external = external;
  runtime.require = require;
  runtime.import = load;
  runtime.interop = interop;
  runtime.export = exportAll;
  runtime.reexport = reexport;
  runtime.hotApply = hotApply;
  return runtime;
})());
"#;

/// The registry source; defines `__brisk` in the chunk scope
pub fn runtime_source() -> &'static str {
    RUNTIME
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::lexer::tokenize;

    #[test]
    fn test_runtime_lexes_and_is_balanced() {
        let lexed = tokenize(runtime_source()).unwrap();
        assert!(lexed.is_balanced());
        assert!(runtime_source().starts_with(&format!("var {} =", RUNTIME_BINDING)));
    }
}
