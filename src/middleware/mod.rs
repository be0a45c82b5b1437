pub mod auth;
pub mod csrf;
pub mod rate_limit;
pub mod rbac;
pub mod request_info;
pub mod request_log;
pub mod security_headers;
