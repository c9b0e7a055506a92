//! Context Isolation
//!
//! Derives a child [`SubagentContext`] from a parent [`StateSnapshot`].
//!
//! Each resource has its own explicit sharing policy:
//! - Files are either live-shared with the parent ([`FileSharing::Shared`]) or
//!   replaced by a private empty map that is never merged back.
//! - Todos are never live-shared. The child either starts from its own initial
//!   list ([`TodoPolicy::Isolated`]) or from a deep copy of the parent's list that
//!   is reconciled back on merge ([`TodoPolicy::Forked`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::state::{FileStore, StateSnapshot, TodoItem};

/// How a child sees the parent's virtual file map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileSharing {
    /// Same map as the parent; writes land in the parent immediately
    #[default]
    Shared,
    /// Private empty map, discarded when the child finishes
    Isolated,
}

/// How a child's todo list relates to the parent's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoPolicy {
    /// Private list seeded from `initial_todos`; never merged back
    #[default]
    Isolated,
    /// Deep copy of the parent's list; reconciled back by last-write-wins
    Forked,
}

/// Options controlling how a child context is derived
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsolationOptions {
    pub files: FileSharing,
    pub todos: TodoPolicy,
    /// Seed list for isolated todos, ignored when todos are forked
    pub initial_todos: Vec<TodoItem>,
}

impl IsolationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` shares the parent's file map, `false` gives the child a private one
    pub fn share_files(mut self, share: bool) -> Self {
        self.files = if share {
            FileSharing::Shared
        } else {
            FileSharing::Isolated
        };
        self
    }

    /// `true` keeps the child's todos private, `false` forks the parent's list
    pub fn isolate_todos(mut self, isolate: bool) -> Self {
        self.todos = if isolate {
            TodoPolicy::Isolated
        } else {
            TodoPolicy::Forked
        };
        self
    }

    pub fn with_initial_todos(mut self, todos: Vec<TodoItem>) -> Self {
        self.initial_todos = todos;
        self
    }
}

/// Working state handed to a single subagent.
///
/// Holds a back-reference to the parent state which only the merger touches.
#[derive(Debug)]
pub struct SubagentContext {
    /// Isolated or derived working copy
    pub state: StateSnapshot,
    parent: Arc<StateSnapshot>,
    files: FileSharing,
    todos: TodoPolicy,
    merged: AtomicBool,
}

impl SubagentContext {
    pub fn files_shared(&self) -> bool {
        self.files == FileSharing::Shared
    }

    pub fn todos_isolated(&self) -> bool {
        self.todos == TodoPolicy::Isolated
    }

    pub fn file_sharing(&self) -> FileSharing {
        self.files
    }

    pub fn todo_policy(&self) -> TodoPolicy {
        self.todos
    }

    /// Whether this context still points at `parent`
    pub fn is_child_of(&self, parent: &Arc<StateSnapshot>) -> bool {
        Arc::ptr_eq(&self.parent, parent)
    }

    pub fn is_merged(&self) -> bool {
        self.merged.load(Ordering::SeqCst)
    }

    pub(crate) fn parent_state(&self) -> &StateSnapshot {
        &self.parent
    }

    /// Flip the merged flag; `true` only for the first caller
    pub(crate) fn claim_merge(&self) -> bool {
        !self.merged.swap(true, Ordering::SeqCst)
    }
}

/// Builds child contexts from a parent state
#[derive(Debug, Clone, Default)]
pub struct ContextIsolationBuilder {
    options: IsolationOptions,
}

impl ContextIsolationBuilder {
    pub fn new(options: IsolationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &IsolationOptions {
        &self.options
    }

    /// Derive one child context from `parent`
    pub fn build(&self, parent: &Arc<StateSnapshot>) -> SubagentContext {
        let files = match self.options.files {
            FileSharing::Shared => parent.files().share(),
            FileSharing::Isolated => FileStore::new(),
        };
        let todos = match self.options.todos {
            TodoPolicy::Isolated => self.options.initial_todos.clone(),
            TodoPolicy::Forked => parent.todos(),
        };

        SubagentContext {
            state: StateSnapshot::with_parts(todos, files),
            parent: Arc::clone(parent),
            files: self.options.files,
            todos: self.options.todos,
            merged: AtomicBool::new(false),
        }
    }

    /// Derive `count` independent child contexts from `parent`
    pub fn build_many(&self, parent: &Arc<StateSnapshot>, count: usize) -> Vec<SubagentContext> {
        (0..count).map(|_| self.build(parent)).collect()
    }
}

/// Shorthand for `ContextIsolationBuilder::new(options).build(parent)`
pub fn build_context(parent: &Arc<StateSnapshot>, options: &IsolationOptions) -> SubagentContext {
    ContextIsolationBuilder::new(options.clone()).build(parent)
}
