#![doc = "task-intake-core: file aggregation and task submission pipeline."]

//! This crate holds the client-side coordination logic for creating a task:
//! collecting input files from one of four sources (local paths, a mounted
//! share, remote URLs, a cloud bucket), validating them together with a
//! label set, and sequencing the multi-stage submission against a backend.
//!
//! Every backend capability is consumed through the traits in [`contract`],
//! so the CLI crate injects HTTP clients and tests inject mocks.
//!
//! # Modules
//! - [`sources`]: the per-source file model and the active-source view
//! - [`share_tree`]: lazy, de-duplicated loading of the share directory tree
//! - [`bucket`]: cloud bucket listing, selection and signed-URL requests
//! - [`materialize`]: bounded-parallel fetch of signed URLs into in-memory files
//! - [`submission`]: the phase machine that ties it all together

pub mod bucket;
pub mod config;
pub mod contract;
pub mod error;
pub mod fetch;
pub mod forms;
pub mod materialize;
pub mod share_tree;
pub mod sources;
pub mod submission;

pub use error::IntakeError;
