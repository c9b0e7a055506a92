// Subagent Context Module
//
// This module derives the working state each subagent runs against:
// - Explicit per-resource sharing policies (files, todos)
// - Child context construction from a parent state

mod isolation;


pub use isolation::*;
