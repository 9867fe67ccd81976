//! History scanner
//!
//! Finds the per-pass IR dumps of one compilation and orders them the way
//! the passes ran, using a numeric-aware key on the file name.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::utils::{Error, Result};

/// Directory the compiler dumps pass snapshots into
pub const HISTORY_DIR_NAME: &str = "ir_pass_history";

/// Extension of snapshot files
pub const SNAPSHOT_EXTENSION: &str = "mlir";

/// One recorded IR dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    /// File name, e.g. `10_canonicalize.mlir`
    pub name: String,
    /// Basename of the enclosing directory
    pub context: String,
    pub sort_key: NaturalKey,
}

/// Token of a [`NaturalKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    Text(String),
    Number(String),
}

impl KeyToken {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyToken::Number(a), KeyToken::Number(b)) => {
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (KeyToken::Text(a), KeyToken::Text(b)) => a.cmp(b),
            (KeyToken::Number(_), KeyToken::Text(_)) => Ordering::Less,
            (KeyToken::Text(_), KeyToken::Number(_)) => Ordering::Greater,
        }
    }
}

/// Alternating text and digit runs of a name, always starting with a
/// (possibly empty) text run. Digit runs compare as integers of any size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey(Vec<KeyToken>);

impl NaturalKey {
    pub fn new(name: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_digits = false;
        for c in name.chars() {
            if c.is_ascii_digit() != in_digits {
                tokens.push(Self::token(std::mem::take(&mut current), in_digits));
                in_digits = !in_digits;
            }
            current.push(c);
        }
        tokens.push(Self::token(current, in_digits));
        Self(tokens)
    }

    fn token(text: String, digits: bool) -> KeyToken {
        if digits {
            KeyToken::Number(text)
        } else {
            KeyToken::Text(text)
        }
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.compare(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Locate the pass-history directory under `root`
pub fn resolve_history_root(root: &Path) -> Result<PathBuf> {
    let joined = root.join(HISTORY_DIR_NAME);
    if joined.is_dir() {
        return Ok(joined);
    }
    let names_history = root.components().any(|c| c.as_os_str() == HISTORY_DIR_NAME);
    if names_history && root.is_dir() {
        return Ok(root.to_path_buf());
    }
    Err(Error::HistoryNotFound { path: joined })
}

/// All snapshot files below `history_root`, in pass order
pub fn scan(history_root: &Path) -> Vec<SnapshotFile> {
    let mut files: Vec<SnapshotFile> = WalkDir::new(history_root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping unreadable history entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == SNAPSHOT_EXTENSION))
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let context = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default();
            SnapshotFile {
                sort_key: NaturalKey::new(&name),
                path: entry.into_path(),
                name,
                context,
            }
        })
        .collect();

    files.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.path.cmp(&b.path)));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn names(files: &[SnapshotFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_natural_key_tokens() {
        let key = NaturalKey::new("10_x2.mlir");
        assert_eq!(
            key.0,
            vec![
                KeyToken::Text(String::new()),
                KeyToken::Number("10".to_string()),
                KeyToken::Text("_x".to_string()),
                KeyToken::Number("2".to_string()),
                KeyToken::Text(".mlir".to_string()),
            ]
        );
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec!["9_x.mlir", "10_x.mlir", "2_x.mlir", "a.mlir", "02_y.mlir"];
        names.sort_by_key(|name| NaturalKey::new(name));
        assert_eq!(names, vec!["2_x.mlir", "02_y.mlir", "9_x.mlir", "10_x.mlir", "a.mlir"]);
    }

    #[test]
    fn test_large_numbers_do_not_overflow() {
        let small = NaturalKey::new("99999999999999999999999_a.mlir");
        let large = NaturalKey::new("100000000000000000000000_a.mlir");
        assert!(small < large);
    }

    #[test]
    fn test_scan_walks_subdirectories() {
        let dir = TempDir::new().unwrap();
        let history = dir.path().join(HISTORY_DIR_NAME);
        fs::create_dir_all(history.join("dispatch_0")).unwrap();
        fs::write(history.join("9_x.mlir"), "").unwrap();
        fs::write(history.join("10_x.mlir"), "").unwrap();
        fs::write(history.join("dispatch_0").join("2_x.mlir"), "").unwrap();
        fs::write(history.join("notes.txt"), "").unwrap();

        let root = resolve_history_root(dir.path()).unwrap();
        assert_eq!(root, history);
        let files = scan(&root);
        assert_eq!(names(&files), vec!["2_x.mlir", "9_x.mlir", "10_x.mlir"]);
        assert_eq!(files[0].context, "dispatch_0");
        assert_eq!(files[1].context, HISTORY_DIR_NAME);
    }

    #[test]
    fn test_history_dir_given_directly() {
        let dir = TempDir::new().unwrap();
        let history = dir.path().join(HISTORY_DIR_NAME);
        fs::create_dir_all(&history).unwrap();
        assert_eq!(resolve_history_root(&history).unwrap(), history);
        assert!(scan(&history).is_empty());
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = resolve_history_root(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::HistoryNotFound { .. }));
        assert!(err.to_string().contains(HISTORY_DIR_NAME));
    }
}
