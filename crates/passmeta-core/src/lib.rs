pub mod config;
pub mod lifecycle;
pub mod outcome;

pub use config::AppConfig;
pub use outcome::Outcome;
