pub mod config;
pub mod error;
pub mod job;
pub mod messages;
pub mod repo;

pub use config::Config;
pub use error::*;
pub use job::*;
pub use messages::*;
pub use repo::*;
