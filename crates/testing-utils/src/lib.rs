//! # Orchestrator Testing Utils
//!
//! Shared test doubles for the analysis orchestrator workspace.
//!
//! ## Features
//!
//! - **Unavailable Store**: a `KeyValueStore` whose every call fails, for degradation tests
//! - **Mock Job Queue**: in-memory queue with a failure switch
//! - **Scripted Engine**: an `AnalysisEngine` that replays progress and a fixed outcome
//! - **Counting Registry**: a `TaskRegistry` wrapper that counts progress writes
//! - **Test Data Builders**: `AnalysisTaskBuilder` with sensible defaults
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
