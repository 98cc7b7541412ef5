mod dsl;

pub mod bench;
pub mod channel;
pub mod components;
pub mod config;
pub mod error;
pub mod framework;
pub mod params;
mod utils;

pub use bench::{Cluster, Report};
pub use config::ClusterConfig;
pub use error::{ConfigError, SimError};
pub use utils::{clog2, is_pow2};
