//! The small config file living next to the binary. It only knows where the
//! database is; everything else lives inside the database itself.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{self, Context};
use neardup_common::utils::fsutils::read_optional_file;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Serialize, Deserialize)]
struct Config {
    #[serde(rename = "dbPath")]
    db_path: Option<PathBuf>,
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("videos.db")
}

/// The database path from the config file. A missing file, malformed JSON or
/// an empty path all fall back to the default.
pub fn load_database_path(config: &Path) -> PathBuf {
    let contents = match read_optional_file(config) {
        Ok(Some(contents)) => contents,
        Ok(None) => return default_database_path(),
        Err(e) => {
            log::warn!("Failed to read {}: {}", config.display(), e);
            return default_database_path();
        }
    };

    match serde_json::from_str::<Config>(&contents) {
        Ok(Config {
            db_path: Some(path),
        }) if !path.as_os_str().is_empty() => path,
        Ok(_) => default_database_path(),
        Err(e) => {
            log::warn!("Failed to parse {}: {}", config.display(), e);
            default_database_path()
        }
    }
}

pub fn save_database_path(config: &Path, db_path: &Path) -> eyre::Result<()> {
    let contents = serde_json::to_string_pretty(&Config {
        db_path: Some(db_path.to_path_buf()),
    })?;
    std::fs::write(config, contents)
        .wrap_err_with(|| format!("failed to write {}", config.display()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.json");
        assert_eq!(default_database_path(), load_database_path(&cfg));
    }

    #[test]
    fn malformed_json_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.json");
        std::fs::write(&cfg, "{not json").unwrap();
        assert_eq!(default_database_path(), load_database_path(&cfg));
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.json");
        let db = dir.path().join("library.db");

        save_database_path(&cfg, &db).unwrap();
        assert_eq!(db, load_database_path(&cfg));
    }

    #[test]
    fn empty_path_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.json");
        std::fs::write(&cfg, r#"{"dbPath": ""}"#).unwrap();
        assert_eq!(default_database_path(), load_database_path(&cfg));
    }
}
