// Boot configuration, read once from a JSON file. A missing file is
// created (directory included) and filled with the defaults; a file
// that fails to parse falls back to the defaults rather than keeping
// the server down. Fields missing from the file take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use holdfast_base::Result;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nodes_db")]
    pub nodes_db: usize,
    #[serde(rename = "API_TOKEN", default = "default_api_token")]
    pub api_token: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_nodes_db() -> usize {
    3
}
fn default_api_token() -> String {
    "your_api_token_here".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            port: default_port(),
            nodes_db: default_nodes_db(),
            api_token: default_api_token(),
        }
    }
}

pub fn load_or_create(path: &Path) -> Result<Config> {
    if !path.exists() {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let config = Config::default();
        std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
        info!(target: "holdfast", "wrote default config to {}", path.display());
        return Ok(config);
    }
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str(&text) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!(target: "holdfast",
                  "config {} unparseable ({e}), using defaults", path.display());
            Ok(Config::default())
        }
    }
}
