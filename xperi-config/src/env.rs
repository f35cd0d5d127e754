// Environment variable loading
//
// `XPERI_SERVER__PORT=8080` becomes `{"server": {"port": 8080}}`: the prefix
// and its separator are stripped, `__` separates nesting levels, keys are
// lowercased and scalar values are coerced.

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::env;

pub const DEFAULT_PREFIX: &str = "XPERI";

/// Separator between nesting levels in a variable name.
pub const NESTING_SEPARATOR: &str = "__";

/// Environment variable loader
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load the process environment.
    pub fn load(&self) -> Map<String, Value> {
        self.load_from(env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn load_from<I, K, V>(&self, vars: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Map::new();
        for (key, value) in vars {
            if let Some(path) = self.strip_prefix(key.as_ref()) {
                insert_path(&mut config, &path, coerce(value.as_ref()));
            }
        }
        config
    }

    /// Read one variable, prefix applied.
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.full_key(key)).map_err(ConfigError::EnvError)
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    fn full_key(&self, key: &str) -> String {
        match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    fn strip_prefix(&self, key: &str) -> Option<Vec<String>> {
        let rest = match self.prefix {
            Some(ref prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => key,
        };
        let path: Vec<String> = rest
            .split(NESTING_SEPARATOR)
            .map(|segment| segment.to_lowercase())
            .collect();
        if path.iter().any(String::is_empty) {
            return None;
        }
        Some(path)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }
}

/// Insert `value` at a nested `path`, replacing scalars found on the way.
pub(crate) fn insert_path(config: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = config;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

/// Booleans and numbers become JSON scalars, everything else stays a string.
pub fn coerce(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if raw.contains('.')
        && let Ok(float) = raw.parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}
