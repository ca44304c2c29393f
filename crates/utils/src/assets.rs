use std::path::PathBuf;

use directories::ProjectDirs;

const ASSET_DIR_ENV: &str = "MUNDOSOLAR_ASSET_DIR";
const CONFIG_PATH_ENV: &str = "MUNDOSOLAR_CONFIG";

/// Directory holding the database and config file.
///
/// `MUNDOSOLAR_ASSET_DIR` wins; debug builds fall back to `./dev_assets`, release builds to the
/// platform data directory.
pub fn asset_dir() -> PathBuf {
    let path = if let Ok(dir) = std::env::var(ASSET_DIR_ENV) {
        PathBuf::from(dir)
    } else if cfg!(debug_assertions) {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../dev_assets")
    } else {
        ProjectDirs::from("mx", "mundosolar", "mundosolar")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    };

    if !path.exists() {
        let _ = std::fs::create_dir_all(&path);
    }
    path
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| asset_dir().join("config.json"))
}

pub fn db_path() -> PathBuf {
    asset_dir().join("mundosolar.sqlite")
}
