//! Configuration management for xperi.
//!
//! Sources are layered into one tree of JSON values; later loads override
//! earlier ones key by key, merging nested tables.
//!
//! ```no_run
//! use xperi_config::{ConfigManager, FileFormat};
//!
//! let config = ConfigManager::new();
//! config.load_file("config/server.toml", FileFormat::Toml)?;
//! config.load_dotenv(None)?;
//!
//! let options = config.server_options()?;
//! println!("listening on {}:{}", options.host, options.port);
//! # Ok::<(), xperi_config::ConfigError>(())
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use xperi_core::ServerOptions;

/// Key of the table `server_options` reads.
pub const SERVER_SECTION: &str = "server";

/// Main configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Map<String, Value>>>,
    env: EnvLoader,
}

impl ConfigManager {
    /// Manager reading `XPERI_*` environment variables.
    pub fn new() -> Self {
        Self::with_env(EnvLoader::default())
    }

    /// Manager reading `<prefix>_*` environment variables.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_env(EnvLoader::new(Some(prefix.into())))
    }

    fn with_env(env: EnvLoader) -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env,
        }
    }

    /// Merge in the process environment.
    pub fn load_env(&self) -> Result<()> {
        self.merge_value(Value::Object(self.env.load()));
        Ok(())
    }

    /// Load a `.env` file into the process environment, then [`load_env`].
    ///
    /// Without a path a missing `.env` is not an error.
    ///
    /// [`load_env`]: Self::load_env
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).load_file(path)?;
        self.merge_value(data);
        Ok(())
    }

    /// Load a file, picking the format from its extension.
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = ConfigLoader::auto(path.as_ref())?.load_file(path)?;
        self.merge_value(data);
        Ok(())
    }

    /// Set a value. Dotted keys address nested tables.
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        env::insert_path(&mut self.config.write(), &split_key(key), json_value);
        Ok(())
    }

    /// Get a value. Dotted keys address nested tables.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Top-level keys.
    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }

    /// Merge another manager's values over this one's.
    pub fn merge(&self, other: &ConfigManager) {
        let snapshot = Value::Object(other.config.read().clone());
        self.merge_value(snapshot);
    }

    /// Deserialize the whole tree and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let json_value = Value::Object(self.config.read().clone());
        deserialize_validated(json_value)
    }

    /// `ServerOptions` from the `server` table, defaults filling the gaps.
    pub fn server_options(&self) -> Result<ServerOptions> {
        let section = self
            .lookup(SERVER_SECTION)
            .unwrap_or_else(|| Value::Object(Map::new()));
        deserialize_validated(section)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let config = self.config.read();
        let mut path = split_key(key).into_iter();
        let mut current = config.get(&path.next()?)?;
        for segment in path {
            current = current.get(&segment)?;
        }
        Some(current.clone())
    }

    fn merge_value(&self, incoming: Value) {
        if let Value::Object(map) = incoming {
            let mut config = self.config.write();
            for (key, value) in map {
                match config.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        config.insert(key, value);
                    }
                }
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn split_key(key: &str) -> Vec<String> {
    key.split('.').map(str::to_string).collect()
}

fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

fn deserialize_validated<T: DeserializeOwned + Validate>(value: Value) -> Result<T> {
    let validated: T = serde_json::from_value(value)
        .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
    validated.validate()?;
    Ok(validated)
}
