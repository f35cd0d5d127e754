// xperi - a minimal async HTTP middleware framework for Rust
//
// Express-style routers with nested mounts and path parameters, driven by an
// explicit `next` continuation between handlers.

// Re-export core functionality
pub use xperi_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use xperi_config;

#[cfg(feature = "security")]
pub use xperi_security;

#[cfg(feature = "testing")]
pub use xperi_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        App,
        Error,
        Handler,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        HttpStatus,
        Layer,
        Next,
        Request,
        Response,
        Router,
        Server,
        ServerOptions,
        UploadOptions,
        async_trait,
        handler,
    };

    #[cfg(feature = "security")]
    pub use xperi_security::{CorsConfig, cors};
}
