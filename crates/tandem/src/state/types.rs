//! Todo and file records held in a [`StateSnapshot`](super::StateSnapshot)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MergeConflictError;

/// Todo item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A single todo entry.
///
/// `completed_at` is set if and only if `status == Completed`; use
/// [`TodoItem::transition`] to change status so the invariant holds.
/// `updated_at` records the latest status transition and drives
/// last-write-wins reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TodoItem {
    /// Create a pending item stamped with the current time
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), content, Utc::now())
    }

    /// Create a pending item with an explicit id and creation time
    pub fn with_id(
        id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: TodoStatus::Pending,
            created_at,
            completed_at: None,
            updated_at: None,
        }
    }

    /// Move to `status` at time `at`
    pub fn transition(&mut self, status: TodoStatus, at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = match status {
            TodoStatus::Completed => Some(at),
            _ => None,
        };
        self.updated_at = Some(at);
    }

    /// Builder form of [`TodoItem::transition`]
    pub fn transitioned(mut self, status: TodoStatus, at: DateTime<Utc>) -> Self {
        self.transition(status, at);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TodoStatus::Completed
    }

    /// Timestamp of the latest version of this item: its creation or its
    /// latest status transition, whichever is later.
    pub fn version_timestamp(&self) -> DateTime<Utc> {
        [Some(self.created_at), self.completed_at, self.updated_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }

    /// Check the record invariants
    pub fn validate(&self) -> Result<(), MergeConflictError> {
        if self.id.trim().is_empty() {
            return Err(MergeConflictError::EmptyTodoId);
        }
        match (self.status, self.completed_at) {
            (TodoStatus::Completed, None) => Err(self.corrupt("completed without completedAt")),
            (TodoStatus::Pending | TodoStatus::InProgress, Some(_)) => {
                Err(self.corrupt("completedAt set on an unfinished item"))
            }
            _ => match self.completed_at {
                Some(done) if done < self.created_at => {
                    Err(self.corrupt("completedAt precedes createdAt"))
                }
                _ => Ok(()),
            },
        }
    }

    fn corrupt(&self, reason: &str) -> MergeConflictError {
        MergeConflictError::CorruptTodo {
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// A virtual file: ordered lines plus timestamps (`modified_at >= created_at`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub content: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileData {
    /// New file created and modified now
    pub fn new(content: Vec<String>) -> Self {
        Self::at(content, Utc::now())
    }

    /// New file created and modified at `at`
    pub fn at(content: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            content,
            created_at: at,
            modified_at: at,
        }
    }

    /// Split text into lines
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines().map(str::to_string).collect())
    }

    /// Join lines back into text
    pub fn text(&self) -> String {
        self.content.join("\n")
    }

    /// Replace the content at `at`, keeping `created_at`. Clamps so that
    /// `modified_at` never precedes `created_at`.
    pub fn update(&mut self, content: Vec<String>, at: DateTime<Utc>) {
        self.content = content;
        self.modified_at = at.max(self.created_at);
    }
}
