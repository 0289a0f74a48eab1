//! Blueprint reflector that works directly off the stored definition.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use super::{ActivityBlueprint, BlueprintReflector, WorkflowBlueprint};
use crate::error::ResolutionError;
use crate::models::WorkflowDefinition;

/// Reflects a definition by copying its activities and variables, rejecting
/// definitions whose activity ids are not unique.
#[derive(Debug, Default, Clone)]
pub struct DefinitionBlueprintReflector;

impl DefinitionBlueprintReflector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlueprintReflector for DefinitionBlueprintReflector {
    async fn reflect(
        &self,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<WorkflowBlueprint, ResolutionError> {
        if cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled);
        }

        let mut seen = HashSet::with_capacity(definition.activities.len());
        for activity in &definition.activities {
            if !seen.insert(activity.activity_id.as_str()) {
                return Err(ResolutionError::reflection(
                    &definition.definition_id,
                    format!("duplicate activity id '{}'", activity.activity_id),
                ));
            }
        }

        Ok(WorkflowBlueprint {
            definition_id: definition.definition_id.clone(),
            version: definition.version,
            activities: definition
                .activities
                .iter()
                .map(|activity| ActivityBlueprint {
                    activity_id: activity.activity_id.clone(),
                    activity_type: activity.activity_type.clone(),
                    properties: activity.properties.clone(),
                })
                .collect(),
            variables: definition.variables.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityDefinition;

    #[tokio::test]
    async fn test_reflect_copies_activities() {
        let definition = WorkflowDefinition::new("wf-1")
            .with_activity(ActivityDefinition::new("a1", "Trigger"))
            .with_activity(ActivityDefinition::new("a2", "WriteLine"));

        let blueprint = DefinitionBlueprintReflector::new()
            .reflect(&definition, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(blueprint.definition_id, "wf-1");
        assert_eq!(blueprint.activities_of_type("Trigger").count(), 1);
    }

    #[tokio::test]
    async fn test_reflect_rejects_duplicate_activity_ids() {
        let definition = WorkflowDefinition::new("wf-dup")
            .with_activity(ActivityDefinition::new("a1", "Trigger"))
            .with_activity(ActivityDefinition::new("a1", "WriteLine"));

        let err = DefinitionBlueprintReflector::new()
            .reflect(&definition, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ResolutionError::Reflection { .. }));
    }
}
