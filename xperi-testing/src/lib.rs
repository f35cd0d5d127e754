//! Testing utilities for xperi applications.
//!
//! - [`TestClient`] dispatches requests through a built [`Server`] in memory,
//!   without opening sockets.
//! - [`TestResponse`] plus the functions in [`assertions`] check what came
//!   back.
//! - [`CallRecorder`] hands out handlers that record when they run, for
//!   checking chain order and short-circuits.
//!
//! ```no_run
//! use xperi_core::{App, Router, handler};
//! use xperi_testing::*;
//!
//! # async fn run() {
//! let mut router = Router::new();
//! router.get("/hello", handler(|_req, res, _next, _server| async move {
//!     res.send("Hello!");
//!     Ok(())
//! }));
//!
//! let client = TestClient::new(App::new().use_middleware(router).build());
//! let response = client.get("/hello").await;
//! assert_status(&response, 200);
//! assert_eq!(response.body_string(), "Hello!");
//! # }
//! ```
//!
//! [`Server`]: xperi_core::Server

pub mod assertions;
pub mod recorder;
pub mod test_client;

pub use assertions::*;
pub use recorder::{CallRecorder, RecordedCall};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};
