//! Plumbing shared by Marquee services and tools: configuration loading and
//! tracing initialisation.

pub mod config;
pub mod tracing;
