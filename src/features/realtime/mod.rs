pub mod hub;
pub mod models;
pub mod routes;

pub use hub::Hub;
pub use models::{Event, PresenceUser};
