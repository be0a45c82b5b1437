pub mod models;
pub mod routes;
pub mod service;

pub use models::{UndoAction, UndoEntry};
pub use service::UndoService;
