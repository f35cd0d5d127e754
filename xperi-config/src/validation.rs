// Configuration validation

use crate::{ConfigError, Result};
use xperi_core::{ServerOptions, UploadOptions};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    pub fn one_of<T: PartialEq>(value: &T, allowed: &[T], field: &str) -> Result<()> {
        if !allowed.contains(value) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of the allowed values",
                field
            )));
        }
        Ok(())
    }

    /// Value must be strictly positive when present.
    pub fn positive<T: PartialOrd + Default>(value: Option<T>, field: &str) -> Result<()> {
        match value {
            Some(v) if v <= T::default() => Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                field
            ))),
            _ => Ok(()),
        }
    }
}

impl Validate for ServerOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "server.host")?;
        ConfigValidator::positive(Some(self.max_body_bytes), "server.max_body_bytes")?;
        ConfigValidator::positive(self.request_timeout_ms, "server.request_timeout_ms")?;
        self.socket_addr().map_err(|e| {
            ConfigError::ValidationError(format!(
                "server.host '{}' is not a valid address: {}",
                self.host, e
            ))
        })?;
        self.upload.validate()
    }
}

impl Validate for UploadOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(self.max_file_size, "server.upload.max_file_size")?;
        if let Some(dir) = &self.upload_dir {
            ConfigValidator::not_empty(&dir.to_string_lossy(), "server.upload.upload_dir")?;
        }
        for ext in &self.allow_extensions {
            ConfigValidator::not_empty(ext, "server.upload.allow_extensions[]")?;
        }
        for field in &self.file_fields {
            ConfigValidator::not_empty(field, "server.upload.file_fields[]")?;
        }
        Ok(())
    }
}
