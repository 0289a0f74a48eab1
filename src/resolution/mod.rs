//! # Property Resolution
//!
//! Narrow boundary to the expression engine: given an activity on a blueprint and
//! a property name, produce the configured string value. Discovery never looks at
//! how the value is computed.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ResolutionError;
use crate::models::PropertyExpression;
use crate::registry::{ActivityBlueprint, WorkflowBlueprint};

/// Resolves configured activity property values
#[async_trait]
pub trait PropertyResolver: Send + Sync {
    /// Resolve `property` on `activity`.
    ///
    /// Returns `Ok(None)` when the property is not configured or evaluates to null.
    async fn resolve(
        &self,
        blueprint: &WorkflowBlueprint,
        activity: &ActivityBlueprint,
        property: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolutionError>;
}

/// Resolver for literal values and workflow variables.
///
/// Scripted expressions need a real engine and are reported as unsupported.
#[derive(Debug, Default, Clone)]
pub struct LiteralPropertyResolver;

impl LiteralPropertyResolver {
    pub fn new() -> Self {
        Self
    }

    fn scalar_to_string(
        activity: &ActivityBlueprint,
        property: &str,
        value: &serde_json::Value,
    ) -> Result<Option<String>, ResolutionError> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) => Ok(Some(s.clone())),
            serde_json::Value::Number(n) => Ok(Some(n.to_string())),
            serde_json::Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(ResolutionError::property(
                &activity.activity_id,
                property,
                format!("expected a scalar value, found {other}"),
            )),
        }
    }
}

#[async_trait]
impl PropertyResolver for LiteralPropertyResolver {
    async fn resolve(
        &self,
        blueprint: &WorkflowBlueprint,
        activity: &ActivityBlueprint,
        property: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolutionError> {
        if cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled);
        }

        match activity.properties.get(property) {
            None => Ok(None),
            Some(PropertyExpression::Literal(value)) => Ok(Some(value.clone())),
            Some(PropertyExpression::Variable(name)) => match blueprint.variable(name) {
                Some(value) => Self::scalar_to_string(activity, property, value),
                None => Err(ResolutionError::MissingVariable {
                    activity_id: activity.activity_id.clone(),
                    variable: name.clone(),
                }),
            },
            Some(PropertyExpression::Expression { language, .. }) => {
                Err(ResolutionError::UnsupportedExpression {
                    activity_id: activity.activity_id.clone(),
                    property: property.to_string(),
                    language: language.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn blueprint_with(activity: ActivityBlueprint) -> WorkflowBlueprint {
        WorkflowBlueprint {
            definition_id: "wf-1".to_string(),
            version: 1,
            activities: vec![activity],
            variables: HashMap::from([
                ("topic".to_string(), json!("orders")),
                ("shard".to_string(), json!(7)),
                ("routing".to_string(), json!({"nested": true})),
            ]),
        }
    }

    fn activity(properties: Vec<(&str, PropertyExpression)>) -> ActivityBlueprint {
        ActivityBlueprint {
            activity_id: "a1".to_string(),
            activity_type: "Trigger".to_string(),
            properties: properties
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    async fn resolve(activity: ActivityBlueprint, property: &str) -> Result<Option<String>, ResolutionError> {
        let blueprint = blueprint_with(activity.clone());
        LiteralPropertyResolver::new()
            .resolve(&blueprint, &activity, property, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_literal_and_variable_values() {
        let act = activity(vec![
            ("TopicName", PropertyExpression::variable("topic")),
            ("SubscriptionName", PropertyExpression::literal("sub-a")),
            ("Shard", PropertyExpression::variable("shard")),
        ]);

        assert_eq!(resolve(act.clone(), "TopicName").await.unwrap(), Some("orders".to_string()));
        assert_eq!(resolve(act.clone(), "SubscriptionName").await.unwrap(), Some("sub-a".to_string()));
        assert_eq!(resolve(act.clone(), "Shard").await.unwrap(), Some("7".to_string()));
        assert_eq!(resolve(act, "Missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unresolvable_values() {
        let act = activity(vec![
            ("Undefined", PropertyExpression::variable("nope")),
            ("Object", PropertyExpression::variable("routing")),
            (
                "Scripted",
                PropertyExpression::Expression {
                    language: "liquid".to_string(),
                    source: "{{ input.topic }}".to_string(),
                },
            ),
        ]);

        assert!(matches!(
            resolve(act.clone(), "Undefined").await,
            Err(ResolutionError::MissingVariable { .. })
        ));
        assert!(matches!(
            resolve(act.clone(), "Object").await,
            Err(ResolutionError::Property { .. })
        ));
        assert!(matches!(
            resolve(act, "Scripted").await,
            Err(ResolutionError::UnsupportedExpression { .. })
        ));
    }
}
