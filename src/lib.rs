pub mod board;
pub mod core;
pub mod main_module;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::state::AppState;
pub use crate::main_module::{build_router, build_state, run_axum_server};
