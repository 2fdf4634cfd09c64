use std::net::SocketAddr;
use std::path::PathBuf;

use directories::ProjectDirs;

#[derive(Debug, Clone)]
pub struct Config {
    /// Loopback address the API binds to.
    pub http_addr: SocketAddr,
    /// Directory holding the API key, the app database, and the engine's
    /// session store.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("com", "herald", "herald")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./herald-data"));

        Self {
            http_addr: ([127, 0, 0, 1], 3847).into(),
            data_dir,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HERALD_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HERALD_HTTP_ADDR, using default");
            }
        }

        if let Ok(dir) = std::env::var("HERALD_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config
    }
}
