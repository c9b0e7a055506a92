// Parallel Subagent Execution Module
//
// This module provides the batch execution machinery:
// - Execution units and subagent definitions
// - Bounded, work-conserving parallel executor
// - Per-task outcomes, progress and summaries

mod executor;
mod outcome;
mod unit;


pub use executor::*;
pub use outcome::*;
pub use unit::*;
