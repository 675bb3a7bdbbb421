//! Table question answering through a plan, execute, verify loop.
//!
//! A [`Pipeline`] decomposes each query into sub-questions, answers every
//! sub-question with a synthesized routine (repairing it on failure), checks
//! whether the plan covers the query, and finally writes the answer in the
//! dataset's style. [`driver::run_dataset`] applies it to a whole dataset
//! with resumable output.

pub mod driver;
pub mod execution;
pub mod gateway;
pub mod pipeline;
pub mod prompts;
pub mod synthesis;

pub use driver::{RunRequest, RunSummary, run_dataset};
pub use execution::{CallReport, Executor, resolve_and_run};
pub use gateway::Gateway;
pub use pipeline::{LoopOutput, Pipeline};
