//! Configuration for tiered-memory

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Configuration for the memory system
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Number of items the short-term cache holds before evicting
    pub stm_capacity: usize,

    /// Embedding dimensions shared by both tiers (384 for all-MiniLM-L6-v2)
    pub dimensionality: usize,

    /// Default `k` when a search request does not give one
    pub max_search_results: usize,

    /// HTTP server port
    pub server_port: u16,

    /// Load and save the long-term tier from SQLite
    pub persist_ltm: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tiered-memory");

        Self {
            data_dir,
            stm_capacity: 20,
            dimensionality: 384,
            max_search_results: 10,
            server_port: 8421,
            persist_ltm: true,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_stm_capacity(mut self, capacity: usize) -> Self {
        self.stm_capacity = capacity;
        self
    }

    pub fn with_dimensionality(mut self, dimensionality: usize) -> Self {
        self.dimensionality = dimensionality;
        self
    }

    /// Overlay settings from `TIERED_MEMORY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("TIERED_MEMORY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(capacity) = env_number("TIERED_MEMORY_STM_CAPACITY")? {
            config.stm_capacity = capacity;
        }
        if let Some(dimensionality) = env_number("TIERED_MEMORY_DIMENSIONALITY")? {
            config.dimensionality = dimensionality;
        }
        if let Some(port) = env_number("TIERED_MEMORY_PORT")? {
            config.server_port = port;
        }
        if let Some(max_results) = env_number("TIERED_MEMORY_MAX_RESULTS")? {
            config.max_search_results = max_results;
        }
        if let Some(persist) = env_flag("TIERED_MEMORY_PERSIST_LTM")? {
            config.persist_ltm = persist;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the stores cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.stm_capacity == 0 {
            return Err(Error::config("stm_capacity must be positive"));
        }
        if self.dimensionality == 0 {
            return Err(Error::config("dimensionality must be positive"));
        }
        if self.max_search_results == 0 {
            return Err(Error::config("max_search_results must be positive"));
        }
        Ok(())
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{} is not a valid number: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::config(format!("{} is not a valid flag: {}", key, raw))),
        },
        Err(_) => Ok(None),
    }
}
