//! Platform-specific locations for configuration and state

use std::path::PathBuf;

const APP_DIR: &str = "NightscoutService";

/// Get the platform-specific data directory
///
/// Returns:
/// - Windows: %APPDATA%\NightscoutService
/// - macOS: ~/Library/Application Support/NightscoutService
/// - Linux/Other: ~/.local/share/NightscoutService
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(dirs::data_local_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Credentials, OTP secret and service state
pub fn get_default_state_path() -> PathBuf {
    get_data_dir().join("state.json")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
