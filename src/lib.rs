mod config;
pub use config::Config;

mod errors;
pub use errors::{Error, KeyError, Result};

pub mod content_type;
pub mod http;
pub mod janitor;
pub mod objects;
pub mod streaming;
pub mod uploads;
