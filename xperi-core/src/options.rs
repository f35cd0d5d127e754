// Server and upload options

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Options for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Requests with a larger body are answered with 413 before dispatch.
    pub max_body_bytes: usize,
    /// Abort a dispatch after this many milliseconds. `None` disables it.
    pub request_timeout_ms: Option<u64>,
    pub upload: UploadOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
            max_body_bytes: 2 * 1024 * 1024,
            request_timeout_ms: None,
            upload: UploadOptions::default(),
        }
    }
}

impl ServerOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    pub fn with_upload(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }

    /// `host:port` as a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Rules applied to `multipart/form-data` bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Directory files are written to. Files stay in memory when unset.
    pub upload_dir: Option<PathBuf>,
    /// Keep the original extension on stored file names.
    pub keep_extensions: bool,
    /// Accepted extensions without the dot. Empty accepts everything.
    pub allow_extensions: Vec<String>,
    pub max_file_size: Option<u64>,
    pub max_fields: Option<usize>,
    /// Form fields that may carry files. Empty accepts every field.
    pub file_fields: Vec<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            upload_dir: None,
            keep_extensions: true,
            allow_extensions: Vec::new(),
            max_file_size: None,
            max_fields: None,
            file_fields: Vec::new(),
        }
    }
}

impl UploadOptions {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn keep_extensions(mut self, keep: bool) -> Self {
        self.keep_extensions = keep;
        self
    }

    pub fn allow_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_extensions = extensions
            .into_iter()
            .map(|ext| ext.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn max_fields(mut self, fields: usize) -> Self {
        self.max_fields = Some(fields);
        self
    }

    pub fn file_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn accepts_field(&self, field: &str) -> bool {
        self.file_fields.is_empty() || self.file_fields.iter().any(|f| f == field)
    }

    pub(crate) fn accepts_extension(&self, extension: Option<&str>) -> bool {
        if self.allow_extensions.is_empty() {
            return true;
        }
        match extension {
            Some(ext) => {
                let ext = ext.to_ascii_lowercase();
                self.allow_extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            }
            None => false,
        }
    }
}
