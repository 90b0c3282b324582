//! X-line database persistence.
//!
//! Flat UTF-8 text, one entry per line:
//!
//! ```text
//! VERSION 1
//! LINE K *@banned.example oper!o@staff.example 1700000000 0 :no spam
//! ```
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so a crash mid-write never corrupts the database. The registry's
//! dirty flag decides when the periodic timer actually writes.

use std::io::Write;
use std::path::Path;

use crate::error::StoreError;

use super::XLine;

/// An entry as read from disk; the type tag is still a plain string until
/// the registry resolves it against a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLine {
    pub kind: String,
    pub pattern: String,
    pub setter: String,
    pub set_at: i64,
    pub duration_secs: u64,
    pub reason: String,
}

/// Serialize entries to `path` atomically.
pub fn save(path: &Path, entries: &[XLine]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut text = String::from("VERSION 1\n");
    for entry in entries {
        text.push_str(&format!(
            "LINE {} {} {} {} {} :{}\n",
            entry.kind, entry.pattern, entry.setter, entry.set_at, entry.duration_secs, entry.reason
        ));
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(text.as_bytes()).map_err(io_err)?;
        file.sync_data().ok();
    }
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Replay a database file. A missing file is an empty database.
pub fn load(path: &Path) -> Result<Vec<StoredLine>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let format_err = |line: usize, reason: &str| StoreError::Format {
        path: path.display().to_string(),
        line,
        reason: reason.to_string(),
    };

    let mut lines = text.lines().enumerate();
    match lines.next() {
        Some((_, header)) if header.trim() == "VERSION 1" => {}
        _ => return Err(format_err(1, "missing VERSION 1 header")),
    }

    let mut out = Vec::new();
    for (idx, raw) in lines {
        let lineno = idx + 1;
        let raw = raw.trim_end();
        if raw.is_empty() {
            continue;
        }
        let rest = raw
            .strip_prefix("LINE ")
            .ok_or_else(|| format_err(lineno, "expected LINE"))?;
        let (head, reason) = match rest.split_once(" :") {
            Some((head, reason)) => (head, reason.to_string()),
            None => (rest, String::new()),
        };
        let fields: Vec<&str> = head.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format_err(lineno, "expected 5 fields before the reason"));
        }
        let set_at = fields[3]
            .parse()
            .map_err(|_| format_err(lineno, "bad set-time"))?;
        let duration_secs = fields[4]
            .parse()
            .map_err(|_| format_err(lineno, "bad duration"))?;
        out.push(StoredLine {
            kind: fields[0].to_string(),
            pattern: fields[1].to_string(),
            setter: fields[2].to_string(),
            set_at,
            duration_secs,
            reason,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &'static str, pattern: &str, reason: &str) -> XLine {
        XLine {
            kind,
            pattern: pattern.to_string(),
            reason: reason.to_string(),
            setter: "oper!o@staff".to_string(),
            set_at: 1_700_000_000,
            duration_secs: 3600,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xlines.db");
        let entries = vec![
            entry("K", "*@banned.example", "no spam here"),
            entry("Z", "192.0.2.0/24", "bad netblock"),
        ];
        save(&path, &entries).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].kind, "K");
        assert_eq!(loaded[0].pattern, "*@banned.example");
        assert_eq!(loaded[0].reason, "no spam here");
        assert_eq!(loaded[1].duration_secs, 3600);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.db")).unwrap().is_empty());
    }

    #[test]
    fn bad_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xlines.db");
        std::fs::write(&path, "VERSION 9\n").unwrap();
        assert!(matches!(load(&path), Err(StoreError::Format { line: 1, .. })));
    }

    #[test]
    fn truncated_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xlines.db");
        std::fs::write(&path, "VERSION 1\nLINE K *@x\n").unwrap();
        assert!(matches!(load(&path), Err(StoreError::Format { .. })));
    }

    #[test]
    fn write_is_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xlines.db");
        save(&path, &[entry("K", "*@a", "r")]).unwrap();
        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
        save(&path, &[]).unwrap();
        assert_eq!(load(&path).unwrap().len(), 0);
    }
}
