//! File Edit Primitive (C6) — encoding-aware line-range read/modify/write.
//!
//! No teacher module does file mutation (the teacher is read-only/browsing);
//! this generalizes `types::validate_path` plus a per-path keyed mutex in the
//! teacher's `dashmap` idiom (seen in `types.rs`'s `stub_cache`) to serialize
//! concurrent edits against the same file.

use crate::error::{CoreError, CoreResult};
use crate::types::{validate_path, ByteEdit, Encoding};

use dashmap::DashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

static FILE_LOCKS: OnceLock<DashMap<String, Arc<Mutex<()>>>> = OnceLock::new();

fn lock_for(path: &str) -> Arc<Mutex<()>> {
    let locks = FILE_LOCKS.get_or_init(DashMap::new);
    locks.entry(path.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineSep {
    Lf,
    Crlf,
    Cr,
}

impl LineSep {
    fn as_str(self) -> &'static str {
        match self {
            LineSep::Lf => "\n",
            LineSep::Crlf => "\r\n",
            LineSep::Cr => "\r",
        }
    }

    fn detect(raw: &str) -> Self {
        if raw.contains("\r\n") {
            LineSep::Crlf
        } else if raw.contains('\r') {
            LineSep::Cr
        } else {
            LineSep::Lf
        }
    }
}

fn detect_encoding(bytes: &[u8]) -> (Encoding, usize) {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        (Encoding::Utf16Le, 2)
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        (Encoding::Utf16Be, 2)
    } else if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        (Encoding::Utf8, 3)
    } else {
        (Encoding::Utf8, 0)
    }
}

fn decode(bytes: &[u8], encoding: Encoding, bom_len: usize) -> CoreResult<String> {
    let body = &bytes[bom_len..];
    match encoding {
        Encoding::Utf8 => {
            String::from_utf8(body.to_vec()).map_err(|e| CoreError::Internal(format!("invalid utf-8: {e}")))
        }
        Encoding::Utf16Le => {
            let units: Vec<u16> = body.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            String::from_utf16(&units).map_err(|e| CoreError::Internal(format!("invalid utf-16: {e}")))
        }
        Encoding::Utf16Be => {
            let units: Vec<u16> = body.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            String::from_utf16(&units).map_err(|e| CoreError::Internal(format!("invalid utf-16: {e}")))
        }
    }
}

fn encode(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Utf16Le => text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
        Encoding::Utf16Be => text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
    }
}

/// Split content into lines by a detected separator, trimming exactly one
/// trailing blank line that a `split` over a trailing terminator produces
/// (an artifact, not content) while preserving a genuine trailing blank line.
fn split_lines(content: &str, sep: LineSep) -> Vec<String> {
    let mut lines: Vec<String> = content.split(sep.as_str()).map(String::from).collect();
    if lines.len() > 1 && lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

fn join_lines(lines: &[String], sep: LineSep) -> String {
    lines.join(sep.as_str())
}

fn check_range(start: usize, end: usize, line_count: usize) -> CoreResult<()> {
    if start == 0 || end < start || end > line_count {
        return Err(CoreError::ValidationError(format!(
            "invalid line range {start}..{end} for a file with {line_count} lines"
        )));
    }
    Ok(())
}

pub struct ReadResult {
    pub lines: Vec<String>,
    pub encoding: Encoding,
    pub line_sep: char,
    /// Byte length of the detected separator (1 for LF/CR, 2 for CRLF) — the
    /// `char` above collapses CRLF and CR to the same leading byte, which
    /// isn't enough to compute real byte offsets between lines.
    pub line_sep_bytes: usize,
}

/// `read_with_encoding(path) -> (lines, encoding)` per §4.6.
pub fn read_with_encoding(workspace_root: &Path, rel_path: &str) -> CoreResult<ReadResult> {
    let full = validate_path(workspace_root, rel_path).map_err(|e| CoreError::ValidationError(e.to_string()))?;
    let bytes = fs::read(&full).map_err(|source| CoreError::Io { path: full.clone(), source })?;
    let (encoding, bom_len) = detect_encoding(&bytes);
    let content = decode(&bytes, encoding, bom_len)?;
    let sep = LineSep::detect(&content);
    let lines = split_lines(&content, sep);
    Ok(ReadResult {
        lines,
        encoding,
        line_sep: sep.as_str().chars().next().unwrap_or('\n'),
        line_sep_bytes: sep.as_str().len(),
    })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplaceResult {
    pub original: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// `replace_lines(path, start, end, content, preserve_indentation)` per §4.6.
/// `start`/`end` are 1-based and inclusive.
pub fn replace_lines(
    workspace_root: &Path,
    rel_path: &str,
    start: usize,
    end: usize,
    content: &str,
    preserve_indentation: bool,
) -> CoreResult<ReplaceResult> {
    let guard = lock_for(rel_path);
    let _held = guard.lock().map_err(|_| CoreError::Internal("file lock poisoned".into()))?;

    let full = validate_path(workspace_root, rel_path).map_err(|e| CoreError::ValidationError(e.to_string()))?;
    let raw_bytes = fs::read(&full).map_err(|source| CoreError::Io { path: full.clone(), source })?;
    let (encoding, bom_len) = detect_encoding(&raw_bytes);
    let raw = decode(&raw_bytes, encoding, bom_len)?;
    let sep = LineSep::detect(&raw);
    let mut lines = split_lines(&raw, sep);

    check_range(start, end, lines.len())?;
    let idx_start = start - 1;
    let idx_end = end; // exclusive, 0-based

    let original: Vec<String> = lines[idx_start..idx_end].to_vec();

    let mut replacement_lines: Vec<String> = content.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect();
    if preserve_indentation {
        if let Some(indent) = leading_whitespace(&lines[idx_start]) {
            for line in replacement_lines.iter_mut() {
                if !line.is_empty() && leading_whitespace(line).is_none() {
                    line.insert_str(0, &indent);
                }
            }
        }
    }

    let deleted: Vec<String> = lines.splice(idx_start..idx_end, replacement_lines.clone()).collect();
    let modified: Vec<String> = lines[idx_start..idx_start + replacement_lines.len()].to_vec();

    let new_content = join_lines(&lines, sep);
    let bytes = encode(&new_content, encoding);
    fs::write(&full, bytes).map_err(|source| CoreError::Io { path: full.clone(), source })?;

    Ok(ReplaceResult { original, modified, deleted })
}

fn leading_whitespace(line: &str) -> Option<String> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let prefix_len = line.len() - trimmed.len();
    if prefix_len == 0 {
        None
    } else {
        Some(line[..prefix_len].to_string())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
}

/// `delete_lines(path, start, end) -> {deleted, modified}` per §4.6.
pub fn delete_lines(workspace_root: &Path, rel_path: &str, start: usize, end: usize) -> CoreResult<DeleteResult> {
    let guard = lock_for(rel_path);
    let _held = guard.lock().map_err(|_| CoreError::Internal("file lock poisoned".into()))?;

    let full = validate_path(workspace_root, rel_path).map_err(|e| CoreError::ValidationError(e.to_string()))?;
    let raw_bytes = fs::read(&full).map_err(|source| CoreError::Io { path: full.clone(), source })?;
    let (encoding, bom_len) = detect_encoding(&raw_bytes);
    let raw = decode(&raw_bytes, encoding, bom_len)?;
    let sep = LineSep::detect(&raw);
    let mut lines = split_lines(&raw, sep);

    check_range(start, end, lines.len())?;
    let deleted: Vec<String> = lines.splice(start - 1..end, std::iter::empty()).collect();

    let new_content = join_lines(&lines, sep);
    let bytes = encode(&new_content, encoding);
    fs::write(&full, bytes).map_err(|source| CoreError::Io { path: full.clone(), source })?;

    Ok(DeleteResult { deleted, modified: lines })
}

/// `apply_byte_edits(path, edits)` per §4.6. Edits are sorted descending by
/// `start_byte` before application so earlier offsets stay valid.
pub fn apply_byte_edits(workspace_root: &Path, rel_path: &str, edits: &[ByteEdit]) -> CoreResult<()> {
    let guard = lock_for(rel_path);
    let _held = guard.lock().map_err(|_| CoreError::Internal("file lock poisoned".into()))?;

    let full = validate_path(workspace_root, rel_path).map_err(|e| CoreError::ValidationError(e.to_string()))?;
    let raw_bytes = fs::read(&full).map_err(|source| CoreError::Io { path: full.clone(), source })?;
    let (encoding, bom_len) = detect_encoding(&raw_bytes);
    let mut body = raw_bytes[bom_len..].to_vec();

    let mut sorted: Vec<&ByteEdit> = edits.iter().collect();
    sorted.sort_by(|a, b| b.start_byte.cmp(&a.start_byte));

    for edit in sorted {
        if edit.end_byte > body.len() || edit.start_byte > edit.end_byte {
            return Err(CoreError::ValidationError(format!(
                "byte edit range {}..{} out of bounds for {} bytes",
                edit.start_byte,
                edit.end_byte,
                body.len()
            )));
        }
        let replacement = encode(&edit.replacement, encoding);
        body.splice(edit.start_byte..edit.end_byte, replacement);
    }

    fs::write(&full, body).map_err(|source| CoreError::Io { path: full.clone(), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn read_with_encoding_defaults_to_utf8_no_bom() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a.txt", "hello\nworld\n");
        let result = read_with_encoding(dir.path(), "a.txt").unwrap();
        assert_eq!(result.encoding, Encoding::Utf8);
        assert_eq!(result.lines, vec!["hello", "world"]);
    }

    #[test]
    fn detects_utf16_le_bom() {
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("hi".encode_utf16().flat_map(|u| u.to_le_bytes()));
        fs::write(dir.path().join("b.txt"), &bytes).unwrap();
        let result = read_with_encoding(dir.path(), "b.txt").unwrap();
        assert_eq!(result.encoding, Encoding::Utf16Le);
        assert_eq!(result.lines, vec!["hi"]);
    }

    #[test]
    fn replace_lines_preserves_indentation() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "c.rs", "fn f() {\n    old_line();\n}\n");
        let result = replace_lines(dir.path(), "c.rs", 2, 2, "new_line();", true).unwrap();
        assert_eq!(result.modified, vec!["    new_line();"]);
    }

    #[test]
    fn delete_lines_removes_range() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "d.txt", "one\ntwo\nthree\n");
        let result = delete_lines(dir.path(), "d.txt", 2, 2).unwrap();
        assert_eq!(result.deleted, vec!["two"]);
        assert_eq!(result.modified, vec!["one", "three"]);
    }

    #[test]
    fn rejects_out_of_bounds_range() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "e.txt", "one\ntwo\n");
        let err = delete_lines(dir.path(), "e.txt", 1, 99);
        assert!(err.is_err());
    }

    #[test]
    fn apply_byte_edits_applies_descending() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "f.txt", "abcdef");
        let edits = vec![
            ByteEdit { start_byte: 0, end_byte: 1, replacement: "A".into() },
            ByteEdit { start_byte: 4, end_byte: 6, replacement: "EF".into() },
        ];
        apply_byte_edits(dir.path(), "f.txt", &edits).unwrap();
        let content = fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(content, "AbcdEF");
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "g.txt", "one\r\ntwo\r\nthree\r\n");
        let result = replace_lines(dir.path(), "g.txt", 2, 2, "TWO", false).unwrap();
        assert_eq!(result.modified, vec!["TWO"]);
        let content = fs::read_to_string(dir.path().join("g.txt")).unwrap();
        assert!(content.contains("\r\n"));
    }
}
