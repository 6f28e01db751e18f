//! Hash file: the persistent attribute hash.
//!
//! Persists a `HashFile` JSON document at
//! `<home>/.machina/hashes/<hash>.json`.
//! Writes use an atomic `.tmp` + rename so readers never see a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};

/// Field name → value, sorted for stable dumps.
pub type AttributeHash = BTreeMap<String, String>;

/// On-disk hash payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashFile {
    pub synced_at: DateTime<Utc>,
    pub fields: AttributeHash,
}

impl HashFile {
    pub fn empty() -> Self {
        Self {
            synced_at: Utc::now(),
            fields: AttributeHash::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HashFileCompat {
    synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    fields: AttributeHash,
}

/// `~/.machina/hashes/<hash>.json`
pub fn store_path_at(home: &Path, hash: &str) -> PathBuf {
    home.join(".machina")
        .join("hashes")
        .join(format!("{hash}.json"))
}

/// Load the hash named `hash`.
///
/// Returns an empty hash if the file does not yet exist.
pub fn load_at(home: &Path, hash: &str) -> Result<HashFile, StoreError> {
    let path = store_path_at(home, hash);
    if !path.exists() {
        return Ok(HashFile::empty());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let compat: HashFileCompat = serde_json::from_str(&contents)?;
    Ok(HashFile {
        synced_at: compat.synced_at.unwrap_or_else(Utc::now),
        fields: compat.fields,
    })
}

/// Save the hash atomically: write `<path>.tmp`, then rename to `<path>`.
pub fn save_at(home: &Path, hash: &str, file: &HashFile) -> Result<(), StoreError> {
    let path = store_path_at(home, hash);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid hash file path"),
        ));
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_hash_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let file = load_at(tmp.path(), "nonexistent").unwrap();
        assert!(file.fields.is_empty());
    }

    #[test]
    fn saved_fields_load_back() {
        let tmp = TempDir::new().unwrap();
        let mut file = HashFile::empty();
        file.fields.insert("machine".to_string(), "platina-mk1".to_string());
        file.fields
            .insert("cmdline.console".to_string(), "ttyS0,115200".to_string());

        save_at(tmp.path(), "platina", &file).unwrap();
        let loaded = load_at(tmp.path(), "platina").unwrap();
        assert_eq!(loaded.fields, file.fields);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), "clean_test", &HashFile::empty()).unwrap();
        let tmp_path = store_path_at(tmp.path(), "clean_test").with_extension("json.tmp");
        assert!(
            !tmp_path.exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[test]
    fn load_without_synced_at_sets_timestamp() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path(), "missing_synced_at");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"fields":{"machine":"bmc"}}"#).unwrap();

        let before = Utc::now();
        let loaded = load_at(tmp.path(), "missing_synced_at").unwrap();
        let after = Utc::now();

        assert_eq!(loaded.fields.get("machine"), Some(&"bmc".to_string()));
        assert!(loaded.synced_at >= before && loaded.synced_at <= after);
    }

    #[test]
    fn corrupt_file_is_json_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path(), "corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let err = load_at(tmp.path(), "corrupt").unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
