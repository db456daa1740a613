//! Tracking profile: which activities, states and variables the sink admits.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::event::TrackingEvent;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingProfile {
    pub name: SmolStr,
    pub activities: Vec<SmolStr>,
    pub states: Vec<SmolStr>,
    pub variables: Vec<SmolStr>,
}

impl Default for TrackingProfile {
    fn default() -> Self {
        Self {
            name: SmolStr::new("SimulatorTrackingProfile"),
            activities: vec![SmolStr::new(WILDCARD)],
            states: vec![SmolStr::new(WILDCARD)],
            variables: vec![SmolStr::new(WILDCARD)],
        }
    }
}

impl TrackingProfile {
    /// Activity name and state both match a query.
    #[must_use]
    pub fn admits(&self, event: &TrackingEvent) -> bool {
        let Some(source) = &event.source else {
            return false;
        };
        matches(&self.activities, &source.display_name) && matches(&self.states, &event.state)
    }

    /// Keeps the variables named by the profile; `None` when nothing is left.
    #[must_use]
    pub fn project_variables(
        &self,
        variables: Option<IndexMap<SmolStr, String>>,
    ) -> Option<IndexMap<SmolStr, String>> {
        let variables = variables?;
        if self.variables.iter().any(|query| query == WILDCARD) {
            return Some(variables);
        }
        let kept = variables
            .into_iter()
            .filter(|(name, _)| matches(&self.variables, name))
            .collect::<IndexMap<_, _>>();
        (!kept.is_empty()).then_some(kept)
    }
}

fn matches(queries: &[SmolStr], value: &str) -> bool {
    queries
        .iter()
        .any(|query| query == WILDCARD || query.eq_ignore_ascii_case(value))
}
