pub mod models;
pub mod permissions;
pub mod routes;
pub mod service;

pub use models::{AuthSource, AuthUser, Principal, Role, User};
pub use permissions::PermissionService;
pub use service::AuthService;
