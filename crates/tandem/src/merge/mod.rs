// State Merge Module
//
// This module reconciles finished subagents back into the parent state:
// - Per-policy merge of files and todos
// - Last-write-wins todo reconciliation (parent wins ties)
// - Per-context idempotence

mod merger;


pub use merger::*;
