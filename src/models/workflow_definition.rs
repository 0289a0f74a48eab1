//! # Workflow Definitions
//!
//! The registry-facing shape of a workflow: its activities and their configured
//! property expressions. Expressions are opaque here; evaluating them is the
//! [`PropertyResolver`](crate::resolution::PropertyResolver)'s job.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configured value of an activity property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "syntax", content = "value", rename_all = "snake_case")]
pub enum PropertyExpression {
    /// Plain string value
    Literal(String),
    /// Name of a workflow variable
    Variable(String),
    /// Expression in some scripting language, evaluated with workflow context
    Expression { language: String, source: String },
}

impl PropertyExpression {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }
}

/// One activity as declared in a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    pub activity_id: String,
    pub activity_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyExpression>,
}

impl ActivityDefinition {
    pub fn new(activity_id: impl Into<String>, activity_type: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyExpression) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A registered workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub definition_id: String,
    pub version: i32,
    pub name: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityDefinition>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    pub fn new(definition_id: impl Into<String>) -> Self {
        Self {
            definition_id: definition_id.into(),
            version: 1,
            name: None,
            activities: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_activity(mut self, activity: ActivityDefinition) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Whether any activity in this definition has the given type
    pub fn has_activity_of_type(&self, activity_type: &str) -> bool {
        self.activities
            .iter()
            .any(|activity| activity.activity_type == activity_type)
    }

    /// Distinct activity types declared by this definition
    pub fn activity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .activities
            .iter()
            .map(|activity| activity.activity_type.clone())
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}
