//! Harness that measures how much an injected skill changes an agent's
//! results on a batch of coding tasks.
//!
//! Each task runs twice per repetition: a control arm without the skill and
//! a treatment arm with it. Both arms are verified, reduced to metrics and
//! compared into an impact score; repeated runs add A/B statistics.

pub mod agent;
pub mod config;
pub mod error;
pub mod impact;
pub mod llm;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod output;
pub mod runner;
pub mod statistics;
pub mod telemetry;
pub mod verifier;
pub mod workspace;
