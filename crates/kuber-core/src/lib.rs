pub mod config;
pub mod error;

pub use config::KuberConfig;
pub use error::{KuberError, KuberResult};
