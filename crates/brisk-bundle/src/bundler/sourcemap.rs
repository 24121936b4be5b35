//! Line-level source maps (version 3).
//!
//! Rendering keeps every module line on its own output line, so one segment at
//! column 0 per line is enough to point back at the original line.

use serde::{Deserialize, Serialize};

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const VLQ_BASE_SHIFT: u32 = 5;
const VLQ_BASE_MASK: i64 = (1 << VLQ_BASE_SHIFT) - 1;
const VLQ_CONTINUATION_BIT: i64 = 1 << VLQ_BASE_SHIFT;

/// Append the Base64 VLQ encoding of `value`
fn vlq_encode(value: i64, out: &mut String) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = vlq & VLQ_BASE_MASK;
        vlq >>= VLQ_BASE_SHIFT;
        if vlq > 0 {
            digit |= VLQ_CONTINUATION_BIT;
        }
        out.push(BASE64_CHARS[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    pub file: String,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent")]
    pub sources_content: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Same sources, no mappings (used once the code was rewritten by the minifier)
    pub fn without_mappings(mut self) -> Self {
        self.mappings.clear();
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct LineMapping {
    source: u32,
    original_line: u32,
}

#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    file: String,
    sources: Vec<String>,
    sources_content: Vec<String>,
    lines: Vec<Option<LineMapping>>,
}

impl SourceMapBuilder {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Register a source and return its index
    pub fn add_source(&mut self, name: &str, content: &str) -> u32 {
        if let Some(idx) = self.sources.iter().position(|s| s == name) {
            return idx as u32;
        }
        self.sources.push(name.to_string());
        self.sources_content.push(content.to_string());
        (self.sources.len() - 1) as u32
    }

    /// Map `count` generated lines starting at `generated_line` to consecutive
    /// original lines starting at `original_line` (all zero-based)
    pub fn map_lines(&mut self, generated_line: usize, source: u32, original_line: usize, count: usize) {
        let end = generated_line + count;
        if self.lines.len() < end {
            self.lines.resize(end, None);
        }
        for offset in 0..count {
            self.lines[generated_line + offset] = Some(LineMapping {
                source,
                original_line: (original_line + offset) as u32,
            });
        }
    }

    pub fn build(self) -> SourceMap {
        let mut mappings = String::new();
        let mut prev_source = 0i64;
        let mut prev_line = 0i64;
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                mappings.push(';');
            }
            let Some(line) = line else { continue };
            // generated column 0, source delta, line delta, column 0
            vlq_encode(0, &mut mappings);
            vlq_encode(line.source as i64 - prev_source, &mut mappings);
            vlq_encode(line.original_line as i64 - prev_line, &mut mappings);
            vlq_encode(0, &mut mappings);
            prev_source = line.source as i64;
            prev_line = line.original_line as i64;
        }
        SourceMap {
            version: 3,
            file: self.file,
            sources: self.sources,
            sources_content: self.sources_content,
            names: Vec::new(),
            mappings,
        }
    }
}
