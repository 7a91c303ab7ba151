//! Agent artifact construction and caching.

pub mod builder;

pub use builder::{AgentArtifact, AgentBuilder};
