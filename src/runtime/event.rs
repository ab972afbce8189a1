//! Typed events and the queue they wait in before dispatch
//!
//! Events are ephemeral: created where a state change happens, queued on the
//! owning agent, consumed once by the event bus.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::goal::Goal;
use super::ids::GoalId;
use super::message::AclMessage;
use super::role::RoleRef;

/// Fixed enumeration of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A role joined the registry
    RoleAdded,
    /// A role left the registry
    RoleRemoved,
    /// A role was activated for the first time
    RoleActivated,
    /// A goal joined the goal base
    GoalAdded,
    /// A goal left the goal base
    GoalRemoved,
    /// A goal property was set or changed
    GoalObjectPropertyAdded,
    /// A goal property was removed
    GoalObjectPropertyRemoved,
    /// An inbound ACL message was decoded
    MessageReceived,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::RoleAdded => "ROLE_ADDED",
            EventType::RoleRemoved => "ROLE_REMOVED",
            EventType::RoleActivated => "ROLE_ACTIVATED",
            EventType::GoalAdded => "GOAL_ADDED",
            EventType::GoalRemoved => "GOAL_REMOVED",
            EventType::GoalObjectPropertyAdded => "GOAL_OBJECT_PROPERTY_ADDED",
            EventType::GoalObjectPropertyRemoved => "GOAL_OBJECT_PROPERTY_REMOVED",
            EventType::MessageReceived => "MESSAGE_RECEIVED",
        };
        f.write_str(name)
    }
}

/// Data carried by an event
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Role lifecycle payload
    Role(RoleRef),
    /// Goal lifecycle payload
    Goal(Goal),
    /// Goal property change
    GoalProperty {
        /// Goal whose property changed
        goal: GoalId,
        /// Property name
        property: String,
        /// New value; `None` on removal
        value: Option<serde_json::Value>,
    },
    /// Decoded inbound message
    Message(AclMessage),
    /// No payload
    Empty,
}

/// A fired event: type tag, optional discriminant, payload
#[derive(Debug, Clone)]
pub struct Event {
    /// Event kind
    pub event_type: EventType,
    /// Discriminant value, e.g. a goal property name
    pub discriminant: Option<String>,
    /// Event data
    pub payload: EventPayload,
}

impl Event {
    /// Create an event without discriminant
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            discriminant: None,
            payload,
        }
    }

    /// Create an event carrying a discriminant value
    pub fn discriminated(
        event_type: EventType,
        discriminant: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_type,
            discriminant: Some(discriminant.into()),
            payload,
        }
    }

    /// `RoleAdded` event for a role
    pub fn role_added(role: RoleRef) -> Self {
        Self::new(EventType::RoleAdded, EventPayload::Role(role))
    }

    /// `RoleRemoved` event for a role
    pub fn role_removed(role: RoleRef) -> Self {
        Self::new(EventType::RoleRemoved, EventPayload::Role(role))
    }

    /// `RoleActivated` event for a role
    pub fn role_activated(role: RoleRef) -> Self {
        Self::new(EventType::RoleActivated, EventPayload::Role(role))
    }

    /// `MessageReceived` event for a decoded message
    pub fn message_received(message: AclMessage) -> Self {
        Self::new(EventType::MessageReceived, EventPayload::Message(message))
    }

    /// Role carried by this event, if any
    pub fn role(&self) -> Option<&RoleRef> {
        match &self.payload {
            EventPayload::Role(role) => Some(role),
            _ => None,
        }
    }

    /// Message carried by this event, if any
    pub fn message(&self) -> Option<&AclMessage> {
        match &self.payload {
            EventPayload::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Destination for emitted events
pub trait EventSink: Send + Sync {
    /// Accept one event
    fn emit(&self, event: Event);
}

/// FIFO queue of events awaiting dispatch
#[derive(Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn push(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    /// Put events back at the head of the queue, keeping their order
    pub fn requeue(&self, events: Vec<Event>) {
        let mut queue = self.events.lock();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    /// Take the oldest event
    pub fn pop(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    /// Take up to `limit` events in FIFO order
    pub fn take(&self, limit: usize) -> Vec<Event> {
        let mut events = self.events.lock();
        let count = limit.min(events.len());
        events.drain(..count).collect()
    }

    /// Take every queued event
    pub fn drain(&self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventQueue {
    fn emit(&self, event: Event) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let queue = EventQueue::new();
        queue.emit(Event::new(EventType::GoalAdded, EventPayload::Empty));
        queue.emit(Event::new(EventType::GoalRemoved, EventPayload::Empty));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().event_type, EventType::GoalAdded);
        assert_eq!(queue.pop().unwrap().event_type, EventType::GoalRemoved);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_take_respects_limit() {
        let queue = EventQueue::new();
        for _ in 0..5 {
            queue.push(Event::new(EventType::MessageReceived, EventPayload::Empty));
        }

        assert_eq!(queue.take(3).len(), 3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take(10).len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_keeps_order_ahead_of_newer_events() {
        let queue = EventQueue::new();
        queue.push(Event::new(EventType::RoleAdded, EventPayload::Empty));
        queue.push(Event::new(EventType::RoleRemoved, EventPayload::Empty));
        let taken = queue.take(2);
        queue.push(Event::new(EventType::GoalAdded, EventPayload::Empty));

        queue.requeue(taken);

        let kinds: Vec<_> = queue.drain().into_iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![EventType::RoleAdded, EventType::RoleRemoved, EventType::GoalAdded]
        );
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::GoalObjectPropertyRemoved).unwrap();
        assert_eq!(json, "\"GOAL_OBJECT_PROPERTY_REMOVED\"");
        assert_eq!(
            EventType::GoalObjectPropertyRemoved.to_string(),
            "GOAL_OBJECT_PROPERTY_REMOVED"
        );
    }
}
