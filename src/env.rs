use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir().unwrap_or_else(|| {
        eprintln!("Warning: Could not determine home directory");
        PathBuf::from("/tmp")
    })
});
pub static TAFIL_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("TAFIL_CONFIG_DIR").unwrap_or(HOME_DIR.join(".config").join("tafil"))
});
pub static TAFIL_CONFIG_FILE: Lazy<PathBuf> =
    Lazy::new(|| TAFIL_CONFIG_DIR.join("config.toml"));
pub static TAFIL_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("TAFIL_LOG").unwrap_or(log::LevelFilter::Info));
pub static TAFIL_LOG_FILE_LEVEL: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("TAFIL_LOG_FILE_LEVEL").unwrap_or(*TAFIL_LOG));
pub static TAFIL_LOG_FILE: Lazy<Option<PathBuf>> = Lazy::new(|| var_path("TAFIL_LOG_FILE"));

/// Explicit npm executable, wins over the config file and PATH lookup.
pub static TAFIL_NPM: Lazy<Option<String>> = Lazy::new(|| var("TAFIL_NPM").ok());
pub static TAFIL_DETECT_TIMEOUT: Lazy<Option<String>> =
    Lazy::new(|| var("TAFIL_DETECT_TIMEOUT").ok());

// Captured at startup so dev servers see the same tools the user does
pub static ORIGINAL_PATH: Lazy<Option<String>> = Lazy::new(|| var("PATH").ok());

/// The user's login shell, used to pick which rc file to source before launching.
pub static USER_SHELL: Lazy<Option<String>> = Lazy::new(|| var("SHELL").ok());
pub static COMSPEC: Lazy<String> =
    Lazy::new(|| var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string()));

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}
