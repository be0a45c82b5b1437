pub mod models;
pub mod service;

pub use models::{EmailConfig, Notification};
pub use service::NotificationService;
