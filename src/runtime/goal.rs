//! Goal objects and the goal base
//!
//! Goals are objects with named properties. Property changes emit events
//! discriminated by property name, so a handler can bind to one property.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{GoalError, GoalResult};
use super::event::{Event, EventPayload, EventSink, EventType};
use super::ids::GoalId;

/// A goal object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Goal identity
    pub id: GoalId,
    /// Named properties
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Goal {
    /// Create a goal with no properties
    pub fn new() -> Self {
        Self {
            id: GoalId::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

impl Default for Goal {
    fn default() -> Self {
        Self::new()
    }
}

/// Goals held by one agent
pub struct GoalBase {
    goals: RwLock<BTreeMap<GoalId, Goal>>,
    sink: Arc<dyn EventSink>,
}

impl GoalBase {
    /// Create an empty goal base emitting into `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            goals: RwLock::new(BTreeMap::new()),
            sink,
        }
    }

    /// Insert a goal if its id is absent. Emits `GoalAdded` on success.
    pub fn add(&self, goal: Goal) -> bool {
        {
            let mut goals = self.goals.write();
            if goals.contains_key(&goal.id) {
                return false;
            }
            goals.insert(goal.id, goal.clone());
        }

        self.sink
            .emit(Event::new(EventType::GoalAdded, EventPayload::Goal(goal)));
        true
    }

    /// Remove a goal. Emits `GoalRemoved` on success.
    pub fn remove(&self, id: &GoalId) -> bool {
        let Some(goal) = self.goals.write().remove(id) else {
            return false;
        };

        self.sink
            .emit(Event::new(EventType::GoalRemoved, EventPayload::Goal(goal)));
        true
    }

    /// Set a goal property.
    ///
    /// Emits `GoalObjectPropertyAdded` discriminated by `name` when the
    /// property was absent or its value changed; returns false when the value
    /// was already set.
    pub fn set_property(
        &self,
        id: &GoalId,
        name: &str,
        value: serde_json::Value,
    ) -> GoalResult<bool> {
        {
            let mut goals = self.goals.write();
            let goal = goals.get_mut(id).ok_or(GoalError::UnknownGoal(*id))?;
            if goal.properties.get(name) == Some(&value) {
                return Ok(false);
            }
            goal.properties.insert(name.to_string(), value.clone());
        }

        self.sink.emit(Event::discriminated(
            EventType::GoalObjectPropertyAdded,
            name,
            EventPayload::GoalProperty {
                goal: *id,
                property: name.to_string(),
                value: Some(value),
            },
        ));
        Ok(true)
    }

    /// Remove a goal property. Emits `GoalObjectPropertyRemoved` discriminated
    /// by `name` when the property existed.
    pub fn remove_property(&self, id: &GoalId, name: &str) -> GoalResult<bool> {
        {
            let mut goals = self.goals.write();
            let goal = goals.get_mut(id).ok_or(GoalError::UnknownGoal(*id))?;
            if goal.properties.remove(name).is_none() {
                return Ok(false);
            }
        }

        self.sink.emit(Event::discriminated(
            EventType::GoalObjectPropertyRemoved,
            name,
            EventPayload::GoalProperty {
                goal: *id,
                property: name.to_string(),
                value: None,
            },
        ));
        Ok(true)
    }

    /// Copy of a goal
    pub fn get(&self, id: &GoalId) -> Option<Goal> {
        self.goals.read().get(id).cloned()
    }

    /// Snapshot of all goals
    pub fn goals(&self) -> Vec<Goal> {
        self.goals.read().values().cloned().collect()
    }

    /// Number of held goals
    pub fn len(&self) -> usize {
        self.goals.read().len()
    }

    /// Check whether no goals are held
    pub fn is_empty(&self) -> bool {
        self.goals.read().is_empty()
    }
}
