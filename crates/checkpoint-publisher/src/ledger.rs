use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Block hashes are 32 bytes, hex encoded.
pub const HASH_LEN_BYTES: usize = 32;

const TAIL_CHUNK: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: String,
}

impl Checkpoint {
    pub fn new(height: u64, hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        validate_hash(&hash)?;
        Ok(Self { height, hash })
    }

    /// Parses one ledger line of the form `height,hash`.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        let Some((height, hash)) = line.split_once(',') else {
            return Err(Error::parse(format!(
                "invalid checkpoint line '{line}' (expected height,hash)"
            )));
        };
        let height = height.trim().parse::<u64>().map_err(|e| {
            Error::parse(format!("invalid checkpoint height in '{line}': {e}"))
        })?;
        Self::new(height, hash.trim())
            .map_err(|e| Error::parse(format!("invalid checkpoint '{line}': {e}")))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.height, self.hash)
    }
}

pub fn validate_hash(hash: &str) -> Result<()> {
    let bytes = hex::decode(hash).map_err(|e| Error::msg(format!("hash '{hash}' is not hex: {e}")))?;
    if bytes.len() != HASH_LEN_BYTES {
        return Err(Error::msg(format!(
            "hash '{hash}' is {} bytes (expected {HASH_LEN_BYTES})",
            bytes.len()
        )));
    }
    Ok(())
}

/// Renders checkpoints as ledger lines, each terminated by a newline.
pub fn serialize(checkpoints: &[Checkpoint]) -> String {
    let mut out = String::with_capacity(checkpoints.len() * (HASH_LEN_BYTES * 2 + 12));
    for cp in checkpoints {
        out.push_str(&cp.to_string());
        out.push('\n');
    }
    out
}

/// Returns the last non-empty line of `path`, reading backward from the end
/// of the file. A missing or blank file yields `None`.
pub fn read_last_line(path: &Path) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::msg(format!(
                "failed to open ledger {}: {e}",
                path.display()
            )));
        }
    };
    let len = file
        .metadata()
        .map_err(|e| Error::msg(format!("failed to stat ledger {}: {e}", path.display())))?
        .len();

    let mut tail: Vec<u8> = Vec::new();
    let mut pos = len;
    while pos > 0 {
        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;

        let content = trim_line_end(&tail);
        if content.is_empty() {
            continue;
        }
        // Only done once a line break precedes the trailing content, or the
        // whole file has been read.
        if let Some(idx) = content.iter().rposition(|b| *b == b'\n') {
            return decode_line(&content[idx + 1..], path).map(Some);
        }
    }

    let content = trim_line_end(&tail);
    if content.is_empty() {
        return Ok(None);
    }
    decode_line(content, path).map(Some)
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &buf[..end]
}

fn decode_line(bytes: &[u8], path: &Path) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::parse(format!("ledger {} is not UTF-8: {e}", path.display())))
}

/// Height of the last checkpoint persisted in the ledger, or `0` when the
/// ledger does not exist yet.
pub fn watermark(path: &Path) -> Result<u64> {
    let Some(line) = read_last_line(path)? else {
        return Ok(0);
    };
    let cp = Checkpoint::parse_line(&line).map_err(|e| {
        Error::parse(format!(
            "error parsing checkpoints file {} (does it contain checkpoints?): {e}",
            path.display()
        ))
    })?;
    Ok(cp.height)
}

/// Appends already-serialized ledger lines in a single write.
pub fn append(path: &Path, lines: &str) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", parent.display())))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::msg(format!("failed to open ledger {}: {e}", path.display())))?;
    file.write_all(lines.as_bytes())
        .map_err(|e| Error::msg(format!("failed to append to ledger {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn hash(n: u64) -> String {
        format!("{n:064x}")
    }

    #[test]
    fn parse_line_accepts_checkpoint() {
        let cp = Checkpoint::parse_line(&format!("42,{}\n", hash(7))).expect("parse");
        assert_eq!(cp.height, 42);
        assert_eq!(cp.hash, hash(7));
        assert_eq!(cp.to_string(), format!("42,{}", hash(7)));
    }

    #[test]
    fn parse_line_rejects_garbage() {
        let negative = format!("-1,{}", hash(1));
        for bad in ["", "abc", "12", "x,ffff", negative.as_str(), "5,nothex"] {
            let err = Checkpoint::parse_line(bad).expect_err(bad);
            assert_eq!(err.kind(), ErrorKind::Parse, "{bad}");
        }
        let short = Checkpoint::parse_line("5,abcd").expect_err("short hash");
        assert_eq!(short.kind(), ErrorKind::Parse);
    }

    #[test]
    fn missing_ledger_has_zero_watermark() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        assert_eq!(watermark(&path).expect("watermark"), 0);

        fs::write(&path, "").expect("write");
        assert_eq!(watermark(&path).expect("watermark"), 0);
    }

    #[test]
    fn watermark_reads_last_line() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        let cps: Vec<Checkpoint> = (1..=500)
            .map(|h| Checkpoint::new(h, hash(h)).expect("checkpoint"))
            .collect();
        fs::write(&path, serialize(&cps)).expect("write");
        assert_eq!(watermark(&path).expect("watermark"), 500);

        // Trailing blank lines and CRLF endings do not hide the last checkpoint.
        append(&path, &format!("501,{}\r\n\n\n", hash(501))).expect("append");
        assert_eq!(watermark(&path).expect("watermark"), 501);
    }

    #[test]
    fn watermark_ignores_earlier_garbage() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        fs::write(&path, format!("not a checkpoint\n9,{}\n", hash(9))).expect("write");
        assert_eq!(watermark(&path).expect("watermark"), 9);
    }

    #[test]
    fn unparsable_last_line_is_parse_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        fs::write(&path, format!("9,{}\nheight,hash\n", hash(9))).expect("write");
        let err = watermark(&path).expect_err("parse error");
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn single_line_without_newline() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        fs::write(&path, format!("77,{}", hash(77))).expect("write");
        assert_eq!(watermark(&path).expect("watermark"), 77);
    }

    #[test]
    fn serialize_round_trips_max_height() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("checkpoints.csv");
        let cps: Vec<Checkpoint> = [3u64, 10, 4096, 70_000]
            .into_iter()
            .map(|h| Checkpoint::new(h, hash(h)).expect("checkpoint"))
            .collect();
        let body = serialize(&cps);
        assert!(body.ends_with('\n'));
        append(&path, &body).expect("append");
        assert_eq!(watermark(&path).expect("watermark"), 70_000);
        assert_eq!(
            read_last_line(&path).expect("last line"),
            Some(format!("70000,{}", hash(70_000)))
        );
    }

    #[test]
    fn empty_append_does_not_create_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        append(&path, "").expect("append");
        assert!(!path.exists());
    }
}
