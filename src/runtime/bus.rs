//! Event bus: static binding table and dispatch
//!
//! The binding table is supplied once, when the bus is built, and is
//! read-only afterwards. Dispatch resolves bindings through a per-type index
//! so a fired event only visits the bindings of its own type.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::error::panic_detail;
use super::event::{Event, EventType};

/// Handler invoked with the dispatch context and the fired event
pub type Handler<C> = Arc<dyn Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync>;

/// How a binding matches an event's discriminant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminantMatcher {
    /// Matches any discriminant, including none
    Any,
    /// Matches only events carrying exactly this discriminant
    Exact(String),
}

impl DiscriminantMatcher {
    /// Check a discriminant against this matcher
    pub fn matches(&self, discriminant: Option<&str>) -> bool {
        match self {
            DiscriminantMatcher::Any => true,
            DiscriminantMatcher::Exact(expected) => discriminant == Some(expected.as_str()),
        }
    }
}

/// One row of the binding table
pub struct EventBinding<C> {
    /// Handler name, used in fault reports
    pub name: String,
    /// Event type this binding listens to
    pub event_type: EventType,
    /// Discriminant filter
    pub matcher: DiscriminantMatcher,
    handler: Handler<C>,
}

impl<C> EventBinding<C> {
    /// Bind a handler to every event of `event_type`
    pub fn new<F>(name: impl Into<String>, event_type: EventType, handler: F) -> Self
    where
        F: Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            event_type,
            matcher: DiscriminantMatcher::Any,
            handler: Arc::new(handler),
        }
    }

    /// Restrict the binding to one discriminant value
    pub fn with_discriminant(mut self, discriminant: impl Into<String>) -> Self {
        self.matcher = DiscriminantMatcher::Exact(discriminant.into());
        self
    }

    /// Check whether an event is routed to this binding
    pub fn matches(&self, event: &Event) -> bool {
        self.event_type == event.event_type && self.matcher.matches(event.discriminant.as_deref())
    }
}

impl<C> Clone for EventBinding<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            event_type: self.event_type,
            matcher: self.matcher.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<C> fmt::Debug for EventBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// A handler that returned an error or panicked
#[derive(Debug, Clone)]
pub struct HandlerFault {
    /// Name of the failing binding
    pub binding: String,
    /// Event that was being dispatched
    pub event_type: EventType,
    /// Error or panic message
    pub detail: String,
    /// Whether the handler panicked rather than returning an error
    pub panicked: bool,
}

/// Outcome of one `fire` call
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Number of handlers invoked
    pub invoked: usize,
    /// Handlers that failed
    pub faults: Vec<HandlerFault>,
}

impl DispatchReport {
    /// True when every invoked handler succeeded
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Builder collecting the binding table before the bus is sealed
pub struct EventBusBuilder<C> {
    bindings: Vec<EventBinding<C>>,
}

impl<C> EventBusBuilder<C> {
    /// Start an empty table
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Append a binding; registration order is dispatch order
    pub fn register(mut self, binding: EventBinding<C>) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Bind a handler to every event of `event_type`
    pub fn on<F>(self, name: impl Into<String>, event_type: EventType, handler: F) -> Self
    where
        F: Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventBinding::new(name, event_type, handler))
    }

    /// Bind a handler to events of `event_type` carrying `discriminant`
    pub fn on_discriminant<F>(
        self,
        name: impl Into<String>,
        event_type: EventType,
        discriminant: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventBinding::new(name, event_type, handler).with_discriminant(discriminant))
    }

    /// Seal the table
    pub fn build(self) -> EventBus<C> {
        EventBus::from_bindings(self.bindings)
    }
}

impl<C> Default for EventBusBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only binding table with dispatch
pub struct EventBus<C> {
    bindings: Vec<EventBinding<C>>,
    /// Binding indices per event type, in registration order
    index: HashMap<EventType, Vec<usize>>,
}

impl<C> EventBus<C> {
    /// Start building a bus
    pub fn builder() -> EventBusBuilder<C> {
        EventBusBuilder::new()
    }

    /// Build a bus from an externally supplied binding table
    pub fn from_bindings(bindings: impl IntoIterator<Item = EventBinding<C>>) -> Self {
        let bindings: Vec<_> = bindings.into_iter().collect();
        let mut index: HashMap<EventType, Vec<usize>> = HashMap::new();
        for (position, binding) in bindings.iter().enumerate() {
            index.entry(binding.event_type).or_default().push(position);
        }
        Self { bindings, index }
    }

    /// Number of bindings in the table
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings that would receive `event`, in dispatch order
    pub fn resolve<'a>(&'a self, event: &'a Event) -> impl Iterator<Item = &'a EventBinding<C>> + 'a {
        self.index
            .get(&event.event_type)
            .into_iter()
            .flatten()
            .map(move |&position| &self.bindings[position])
            .filter(move |binding| binding.matcher.matches(event.discriminant.as_deref()))
    }

    /// Invoke every matching handler in registration order.
    ///
    /// A failing or panicking handler is reported and dispatch continues with
    /// the next one.
    pub fn fire(&self, context: &C, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();

        for binding in self.resolve(event) {
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| (binding.handler)(context, event)));

            let fault = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => HandlerFault {
                    binding: binding.name.clone(),
                    event_type: event.event_type,
                    detail: format!("{err:#}"),
                    panicked: false,
                },
                Err(payload) => HandlerFault {
                    binding: binding.name.clone(),
                    event_type: event.event_type,
                    detail: panic_detail(payload.as_ref()),
                    panicked: true,
                },
            };

            tracing::warn!(
                handler = %fault.binding,
                event = %fault.event_type,
                panicked = fault.panicked,
                "event handler failed: {}",
                fault.detail
            );
            report.faults.push(fault);
        }

        tracing::debug!(event = %event.event_type, invoked = report.invoked, "event dispatched");
        report
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::from_bindings(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::EventPayload;
    use parking_lot::Mutex;

    type Log = Mutex<Vec<String>>;

    fn record(tag: &'static str) -> impl Fn(&Log, &Event) -> anyhow::Result<()> {
        move |log: &Log, _event: &Event| {
            log.lock().push(tag.to_string());
            Ok(())
        }
    }

    fn property_removed(name: &str) -> Event {
        Event::discriminated(EventType::GoalObjectPropertyRemoved, name, EventPayload::Empty)
    }

    #[test]
    fn test_registration_order() {
        let bus: EventBus<Log> = EventBus::builder()
            .on("first", EventType::RoleAdded, record("first"))
            .on("other", EventType::RoleRemoved, record("other"))
            .on("second", EventType::RoleAdded, record("second"))
            .build();
        let log = Log::default();

        let report = bus.fire(&log, &Event::new(EventType::RoleAdded, EventPayload::Empty));

        assert_eq!(report.invoked, 2);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_discriminant_matching() {
        let bus: EventBus<Log> = EventBus::builder()
            .on_discriminant("deadline", EventType::GoalObjectPropertyRemoved, "deadline", record("deadline"))
            .on("any", EventType::GoalObjectPropertyRemoved, record("any"))
            .build();
        let log = Log::default();

        bus.fire(&log, &property_removed("deadline"));
        bus.fire(&log, &property_removed("priority"));
        bus.fire(
            &log,
            &Event::new(EventType::GoalObjectPropertyRemoved, EventPayload::Empty),
        );

        assert_eq!(*log.lock(), vec!["deadline", "any", "any", "any"]);
    }

    #[test]
    fn test_unbound_event_invokes_nothing() {
        let bus: EventBus<Log> = EventBus::builder()
            .on("roles", EventType::RoleAdded, record("roles"))
            .build();

        let report = bus.fire(&Log::default(), &Event::new(EventType::GoalAdded, EventPayload::Empty));
        assert_eq!(report.invoked, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_faults_do_not_stop_dispatch() {
        let bus: EventBus<Log> = EventBus::builder()
            .on("errors", EventType::MessageReceived, |_: &Log, _: &Event| {
                anyhow::bail!("bad content")
            })
            .on("panics", EventType::MessageReceived, |_: &Log, _: &Event| {
                panic!("handler blew up")
            })
            .on("survivor", EventType::MessageReceived, record("survivor"))
            .build();
        let log = Log::default();

        let report = bus.fire(&log, &Event::new(EventType::MessageReceived, EventPayload::Empty));

        assert_eq!(report.invoked, 3);
        assert_eq!(report.faults.len(), 2);
        assert_eq!(report.faults[0].binding, "errors");
        assert!(!report.faults[0].panicked);
        assert_eq!(report.faults[1].binding, "panics");
        assert!(report.faults[1].panicked);
        assert_eq!(report.faults[1].detail, "handler blew up");
        assert_eq!(*log.lock(), vec!["survivor"]);
    }
}
