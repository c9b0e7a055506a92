//! Execution units
//!
//! A unit pairs a subagent definition with a prompt and gets its execution id
//! at submission. Units are immutable once created.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventMeta;

/// Subagent type descriptor passed through to the generation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentDefinition {
    /// Subagent type, e.g. "researcher" or "general-purpose"
    pub name: String,
    pub description: Option<String>,
    pub model: Option<String>,
    /// Tool names the subagent may use; empty means inherit
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SubagentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: None,
            tools: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<impl Into<String>>) -> Self {
        self.tools = tools.into_iter().map(|t| t.into()).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One task in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUnit {
    definition: SubagentDefinition,
    prompt: String,
    execution_id: String,
    #[serde(default, with = "crate::config::serde_millis")]
    timeout: Option<Duration>,
}

impl ExecutionUnit {
    /// Create a unit with a freshly generated execution id
    pub fn new(definition: SubagentDefinition, prompt: impl Into<String>) -> Self {
        Self::with_execution_id(definition, prompt, uuid::Uuid::new_v4().to_string())
    }

    /// Create a unit with a caller-chosen execution id
    pub fn with_execution_id(
        definition: SubagentDefinition,
        prompt: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            definition,
            prompt: prompt.into(),
            execution_id: execution_id.into(),
            timeout: None,
        }
    }

    /// Override the batch's per-task timeout for this unit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn definition(&self) -> &SubagentDefinition {
        &self.definition
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn subagent_type(&self) -> &str {
        &self.definition.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn event_meta(&self) -> EventMeta {
        EventMeta::now(&self.execution_id, &self.definition.name)
    }
}
