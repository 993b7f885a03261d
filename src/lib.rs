pub mod accounts;
pub mod app;
pub mod billing;
pub mod config;
pub mod errors;
pub mod extract;
pub mod habits;
pub mod handlers;
pub mod models;
pub mod plans;
pub mod state;
pub mod stats;
pub mod storage;
pub mod streak;
pub mod tasks;

pub use app::router;
pub use config::Config;
pub use state::AppState;
pub use storage::{FileStore, MemoryStore};
