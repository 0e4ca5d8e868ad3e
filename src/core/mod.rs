pub mod driver;
pub mod error;
pub mod events;
pub mod handler;
pub mod monitor;
pub mod opener;
pub mod reader;
pub mod uid;
pub mod utils;
