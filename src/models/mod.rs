pub mod config;
pub mod destination;

pub use config::{validation, KioskConfig};
pub use destination::Destination;
