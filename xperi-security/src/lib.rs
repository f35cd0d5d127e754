//! Security middleware for xperi.
//!
//! Every middleware here is an ordinary chain handler: register it early with
//! [`App::use_middleware`](xperi_core::App::use_middleware) or on a router
//! entry, ahead of the handlers it protects.
//!
//! ```
//! use xperi_core::App;
//! use xperi_security::cors::{CorsConfig, cors};
//!
//! let app = App::new().use_middleware(cors(
//!     CorsConfig::new()
//!         .allow_origins(["https://example.com"])
//!         .max_age(600),
//! ));
//! ```

pub mod cors;

pub use cors::{CorsConfig, cors};
