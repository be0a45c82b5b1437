pub mod models;
pub mod routes;
pub mod service;

pub use models::Vendor;
pub use service::VendorService;
