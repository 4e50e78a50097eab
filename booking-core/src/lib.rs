pub mod calculations;
pub mod db;
pub mod flow;
pub mod models;

pub use db::repository::{BookingRepository, RepositoryError};
pub use models::*;
