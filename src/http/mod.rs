//! HTTP server module: router assembly and streaming endpoint handlers
//! (Component F, §4.6).

pub mod handlers;
pub mod routes;

pub use routes::create_router;
