//! Version 3 source maps for concatenated bundles.
//!
//! Concatenation never moves code within a line, so every generated line maps
//! to column 0 of exactly one source line.

use serde::Serialize;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMap<'a> {
    version: u8,
    file: &'a str,
    source_root: &'a str,
    sources: &'a [String],
    sources_content: &'a [String],
    names: [&'a str; 0],
    mappings: &'a str,
}

/// Builds the map while the bundle is being concatenated.
#[derive(Default)]
pub struct ConcatMap {
    sources: Vec<String>,
    contents: Vec<String>,
    mappings: String,
    lines: usize,
    prev_source: i64,
    prev_line: i64,
}

impl ConcatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `text` as the next chunk of the bundle. `name` is the source
    /// path as the browser should request it.
    pub fn push(&mut self, name: String, text: &str) {
        let source = self.sources.len() as i64;
        self.sources.push(name);
        self.contents.push(text.to_string());

        for line in 0..line_count(text) {
            if self.lines > 0 {
                self.mappings.push(';');
            }

            // [generated column, source index, source line, source column]
            encode_vlq(&mut self.mappings, 0);
            encode_vlq(&mut self.mappings, source - self.prev_source);
            encode_vlq(&mut self.mappings, line as i64 - self.prev_line);
            encode_vlq(&mut self.mappings, 0);

            self.prev_source = source;
            self.prev_line = line as i64;
            self.lines += 1;
        }
    }

    /// Accounts for generated lines that map to nothing, such as the
    /// separator between two chunks.
    pub fn skip_line(&mut self) {
        if self.lines > 0 {
            self.mappings.push(';');
        }
        self.lines += 1;
    }

    pub fn to_json(&self, file: &str) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SourceMap {
            version: 3,
            file,
            source_root: "/",
            sources: &self.sources,
            sources_content: &self.contents,
            names: [],
            mappings: &self.mappings,
        })
    }
}

/// Lines a chunk occupies in the bundle. A trailing newline does not start a
/// new line of its own.
pub(crate) fn line_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let breaks = text.matches('\n').count();
    if text.ends_with('\n') { breaks } else { breaks + 1 }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}
