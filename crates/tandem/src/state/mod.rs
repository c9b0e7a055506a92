// Shared State Module
//
// The unit of state a parent agent shares with, or copies into, its subagents:
// - Todo list (never live-shared, only copied)
// - Virtual file map (live-shared through a FileStore handle, or isolated)

mod file_store;
mod types;

pub use file_store::*;
pub use types::*;

use parking_lot::RwLock;

/// Todo list plus virtual file map.
///
/// Interior mutability lets the generation collaborator mutate a child's state
/// through a shared reference while the merger folds results into the parent.
#[derive(Debug, Default)]
pub struct StateSnapshot {
    todos: RwLock<Vec<TodoItem>>,
    files: FileStore,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(todos: Vec<TodoItem>, files: FileStore) -> Self {
        Self {
            todos: RwLock::new(todos),
            files,
        }
    }

    pub fn with_todos(todos: Vec<TodoItem>) -> Self {
        Self::with_parts(todos, FileStore::new())
    }

    /// Copy of the current todo list
    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.read().clone()
    }

    pub fn todo(&self, id: &str) -> Option<TodoItem> {
        self.todos.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn todo_count(&self) -> usize {
        self.todos.read().len()
    }

    /// Replace the whole todo list
    pub fn set_todos(&self, todos: Vec<TodoItem>) {
        *self.todos.write() = todos;
    }

    /// Insert `item`, replacing any entry with the same id in place
    pub fn upsert_todo(&self, item: TodoItem) {
        let mut todos = self.todos.write();
        match todos.iter_mut().find(|t| t.id == item.id) {
            Some(existing) => *existing = item,
            None => todos.push(item),
        }
    }

    /// Run `f` with exclusive access to the todo list
    pub fn update_todos<R>(&self, f: impl FnOnce(&mut Vec<TodoItem>) -> R) -> R {
        f(&mut self.todos.write())
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }
}
