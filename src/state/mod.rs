//! State module for tracking run progress
//!
//! # Components
//!
//! - `FetchTask`: one URL admitted to a run, owned by one worker at a time
//! - `FetchOutcome`: the immutable result of a fetch attempt
//! - `HostState`: per-host pacing and in-flight accounting
//! - `SequenceState`: the pagination state of one lineage

mod host_state;
mod lineage;
mod outcome;
mod task;

pub use host_state::HostState;
pub use lineage::SequenceState;
pub use outcome::{FailureCategory, FailureReason, FetchOutcome, FetchedPage};
pub use task::FetchTask;
