//! Process wiring: state construction, routing and the HTTP server.

mod bootstrap;
mod health;
mod server;

pub use bootstrap::*;
pub use health::*;
pub use server::*;
