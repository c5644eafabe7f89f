//! HTTP surface: join handshake, health, WebSocket route

pub mod routes;

pub use routes::build_router;
