//! Error types of the library.
//!
//! [`ConfigError`] is raised while a fabric is being elaborated (a component
//! is attached to channels that do not fit it) and is never expected from a
//! correctly generated instance. [`SimError`] is raised while cycles run.

use thiserror::Error;

use crate::framework::diag::Violation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid channel size: {0}")]
    InvalidSize(String),
    #[error("{component}: size mismatch between `{left}` and `{right}`: {detail}")]
    SizeMismatch {
        component: String,
        left: String,
        right: String,
        detail: String,
    },
    #[error("{component}: invalid fifo depth {depth} (power of two >= 2 required)")]
    FifoDepth { component: String, depth: usize },
    #[error("{component}: invalid fan-in/fan-out: {detail}")]
    FanCount { component: String, detail: String },
    #[error("{component}: id width {width} cannot tag {channels} channels")]
    IdWidth {
        component: String,
        width: usize,
        channels: usize,
    },
    #[error("{component}: requires a fixed one-cycle response latency downstream")]
    LatencyContract { component: String },
    #[error("channel `{channel}` already has a {half} driver (`{existing}`)")]
    MultipleDrivers {
        channel: String,
        half: &'static str,
        existing: String,
    },
    #[error("component graph is not acyclic")]
    CyclicTopology,
    #[error("{component}: {detail}")]
    Invalid { component: String, detail: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("combinational logic did not settle after {passes} passes")]
    NoFixpoint { passes: usize },
    #[error("protocol violation: {0}")]
    ProtocolViolation(Violation),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
