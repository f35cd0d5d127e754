// Core library for the xperi HTTP framework
// Request/response facades, path matching, routers and the handler chain
// executor, plus the server that drives them.

pub mod application;
pub mod body_parser;
mod chain;
mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod logging;
pub mod matcher;
pub mod method;
pub mod options;
pub mod params;
pub mod request;
pub mod response;
pub mod router;
pub mod status;

// Re-export commonly used types
pub use application::{App, ErrorCallback, Listening, Server};
pub use body_parser::UploadedFile;
pub use error::*;
pub use handler::{handler, FnHandler, Handler, IntoLayers, Layer, Next};
pub use http::*;
pub use matcher::PathPattern;
pub use method::HttpMethod;
pub use options::{ServerOptions, UploadOptions};
pub use params::Params;
pub use request::Request;
pub use response::Response;
pub use router::{Resolved, RouteEntry, Router};
pub use status::*;

// Used by implementors of `Handler` outside this crate.
pub use async_trait::async_trait;
