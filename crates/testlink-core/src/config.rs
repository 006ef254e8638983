//! Configuration handling for testlink

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::TestlinkError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "testlink.toml";

/// testlink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Source locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Name resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Where production code and tests live, relative to the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Production source directories
    #[serde(default = "default_production")]
    pub production: Vec<String>,

    /// Test source directories
    #[serde(default = "default_tests")]
    pub tests: Vec<String>,

    /// Glob patterns excluded from scanning
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Source file extensions
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Name resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Lines searched above a member when fixing a reference
    #[serde(default = "default_fix_window")]
    pub fix_window: usize,
}

fn default_production() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_tests() -> Vec<String> {
    vec!["tests".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec!["vendor/**".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["php".to_string()]
}

fn default_fix_window() -> usize {
    15
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            production: default_production(),
            tests: default_tests(),
            exclude: default_exclude(),
            extensions: default_extensions(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fix_window: default_fix_window(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, TestlinkError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| TestlinkError::Config {
            path: display.clone(),
            message: format!("failed to read config file: {}", e),
        })?;
        Self::parse(&content).map_err(|message| TestlinkError::Config {
            path: display,
            message,
        })
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("failed to parse config file: {}", e))
    }

    /// Load `testlink.toml` from the given root, or defaults when absent
    pub fn load_from_root(root: &Path) -> Result<Self, TestlinkError> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Config::default())
        }
    }
}
