pub mod pathsafe;
pub mod service;
pub mod task;

pub use service::{router, AppState};
