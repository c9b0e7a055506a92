//! State Merger
//!
//! Folds a finished child's state back into its parent according to the
//! child's sharing policies.
//!
//! - Shared files were live, so nothing is copied back
//! - Isolated files are discarded
//! - Isolated todos are discarded
//! - Forked todos are reconciled by last-write-wins on item id

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::{SubagentContext, TodoPolicy};
use crate::error::MergeConflictError;
use crate::parallel::Outcome;
use crate::state::TodoItem;

/// What a merge did to the parent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// False when the context had already been merged
    pub applied: bool,
    /// Child todos appended to the parent
    pub appended: usize,
    /// Parent todos replaced by a newer child version
    pub updated: usize,
    /// Corrupt child todos that were skipped
    pub skipped: usize,
    /// Child-only files dropped with the isolated store
    pub discarded_files: usize,
    /// One message per skipped item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

impl MergeReport {
    fn applied() -> Self {
        Self {
            applied: true,
            ..Self::default()
        }
    }

    /// Whether the parent's todo list changed
    pub fn changed_todos(&self) -> bool {
        self.appended + self.updated > 0
    }
}

/// Result of reconciling one child todo list into a parent list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoReconciliation {
    pub appended: usize,
    pub updated: usize,
    pub conflicts: Vec<MergeConflictError>,
}

/// Reconcile `child` into `parent` in place.
///
/// Items are matched by id. A child version replaces the parent's only when
/// its version timestamp is strictly later; on ties the parent wins. Child
/// items unknown to the parent are appended in child order.
pub fn reconcile_todos(parent: &mut Vec<TodoItem>, child: &[TodoItem]) -> TodoReconciliation {
    let mut result = TodoReconciliation::default();

    for item in child {
        if let Err(conflict) = item.validate() {
            result.conflicts.push(conflict);
            continue;
        }

        match parent.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                if item.version_timestamp() > existing.version_timestamp() && existing != item {
                    *existing = item.clone();
                    result.updated += 1;
                }
            }
            None => {
                parent.push(item.clone());
                result.appended += 1;
            }
        }
    }

    result
}

/// Merges child contexts back into their parent state
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMerger;

impl StateMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge `context` into its parent once `outcome` is terminal.
    ///
    /// Idempotent per context: only the first call has any effect.
    pub fn merge(&self, context: &SubagentContext, outcome: &Outcome) -> MergeReport {
        if !context.claim_merge() {
            debug!(execution_id = %outcome.execution_id, "context already merged");
            return MergeReport::default();
        }

        let mut report = MergeReport::applied();
        if !context.files_shared() {
            report.discarded_files = context.state.files().len();
        }

        match context.todo_policy() {
            TodoPolicy::Isolated => {}
            TodoPolicy::Forked => {
                let child = context.state.todos();
                let reconciled = context
                    .parent_state()
                    .update_todos(|parent| reconcile_todos(parent, &child));

                report.appended = reconciled.appended;
                report.updated = reconciled.updated;
                report.skipped = reconciled.conflicts.len();
                for conflict in reconciled.conflicts {
                    warn!(
                        execution_id = %outcome.execution_id,
                        "skipping todo during merge: {}",
                        conflict
                    );
                    report.conflicts.push(conflict.to_string());
                }
            }
        }

        debug!(
            execution_id = %outcome.execution_id,
            appended = report.appended,
            updated = report.updated,
            skipped = report.skipped,
            discarded_files = report.discarded_files,
            "merged subagent state"
        );
        report
    }
}
