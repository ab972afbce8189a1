//! Roles and the per-agent role registry
//!
//! A role is an activatable capability unit. The registry is a set of roles
//! keyed by identity; every successful mutation emits a role lifecycle event
//! to the registry's sink once the write lock has been released, so handlers
//! reacting to those events may mutate the registry again.

use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::error::{AgentError, AgentResult};
use super::event::{Event, EventSink};
use super::ids::RoleId;

/// Behaviour of a role as seen by the core
pub trait Role: Send + Sync {
    /// Human-readable role name (not an identity)
    fn name(&self) -> &str;

    /// Activate the role's capabilities.
    ///
    /// Called at most once per registry membership; must not call back into
    /// the registry that is activating it.
    fn activate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Role with no capabilities beyond its name
#[derive(Debug, Clone)]
pub struct NamedRole {
    name: String,
}

impl NamedRole {
    /// Create a named role
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Role for NamedRole {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared handle to a role with identity semantics.
///
/// Each `RoleRef::new` mints a fresh identity; clones share it. Two handles
/// wrapping structurally equal roles are still different roles.
#[derive(Clone)]
pub struct RoleRef {
    id: RoleId,
    role: Arc<dyn Role>,
}

impl RoleRef {
    /// Wrap a role under a new identity
    pub fn new(role: impl Role + 'static) -> Self {
        Self {
            id: RoleId::new(),
            role: Arc::new(role),
        }
    }

    /// Wrap an already shared role under a new identity
    pub fn from_arc(role: Arc<dyn Role>) -> Self {
        Self {
            id: RoleId::new(),
            role,
        }
    }

    /// Identity of this role
    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Role name
    pub fn name(&self) -> &str {
        self.role.name()
    }

    /// Borrow the role behaviour
    pub fn role(&self) -> &dyn Role {
        self.role.as_ref()
    }
}

impl PartialEq for RoleRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RoleRef {}

impl Hash for RoleRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Role({}#{})", self.name(), self.id)
    }
}

struct RoleEntry {
    role: RoleRef,
    active: bool,
}

/// Set of roles held by one agent
pub struct RoleRegistry {
    /// Entries in insertion order
    entries: RwLock<Vec<RoleEntry>>,

    /// Receiver of role lifecycle events
    sink: Arc<dyn EventSink>,
}

impl RoleRegistry {
    /// Create an empty registry emitting into `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sink,
        }
    }

    /// Insert a role if absent. Emits `RoleAdded` on success.
    pub fn add(&self, role: RoleRef) -> bool {
        {
            let mut entries = self.entries.write();
            if entries.iter().any(|entry| entry.role == role) {
                return false;
            }
            entries.push(RoleEntry {
                role: role.clone(),
                active: false,
            });
        }

        tracing::debug!(role = ?role, "role added");
        self.sink.emit(Event::role_added(role));
        true
    }

    /// Remove a role if present. Emits `RoleRemoved` on success.
    pub fn remove(&self, role: &RoleRef) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            match entries.iter().position(|entry| &entry.role == role) {
                Some(index) => entries.remove(index).role,
                None => return false,
            }
        };

        tracing::debug!(role = ?removed, "role removed");
        self.sink.emit(Event::role_removed(removed));
        true
    }

    /// Remove every listed role that is present, as one mutation.
    ///
    /// Absent roles are skipped silently. One `RoleRemoved` event is emitted
    /// per removed role, in the order the roles were listed. Returns true iff
    /// at least one role was removed.
    pub fn remove_all<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a RoleRef>,
    {
        let removed: Vec<RoleRef> = {
            let mut entries = self.entries.write();
            roles
                .into_iter()
                .filter_map(|role| {
                    let index = entries.iter().position(|entry| &entry.role == role)?;
                    Some(entries.remove(index).role)
                })
                .collect()
        };

        for role in &removed {
            tracing::debug!(role = ?role, "role removed");
            self.sink.emit(Event::role_removed(role.clone()));
        }
        !removed.is_empty()
    }

    /// Activate every held role that is not active yet, in registry order.
    ///
    /// Idempotent: roles already active are not activated again. Emits
    /// `RoleActivated` for each newly activated role. On failure the roles
    /// activated before the failing one stay active and keep their events;
    /// the remaining roles are left for a later call. Returns the number of
    /// roles activated by this call.
    pub fn activate_all(&self) -> AgentResult<usize> {
        let mut activated = Vec::new();
        let outcome = {
            let mut entries = self.entries.write();
            let mut outcome = Ok(());
            for entry in entries.iter_mut().filter(|entry| !entry.active) {
                if let Err(err) = entry.role.role().activate() {
                    outcome = Err(AgentError::Activation(format!(
                        "{}: {err:#}",
                        entry.role.name()
                    )));
                    break;
                }
                entry.active = true;
                activated.push(entry.role.clone());
            }
            outcome
        };

        for role in &activated {
            tracing::debug!(role = ?role, "role activated");
            self.sink.emit(Event::role_activated(role.clone()));
        }
        outcome.map(|()| activated.len())
    }

    /// Snapshot of the held roles, in registry order
    pub fn roles(&self) -> Vec<RoleRef> {
        self.entries
            .read()
            .iter()
            .map(|entry| entry.role.clone())
            .collect()
    }

    /// Check whether a role is held
    pub fn contains(&self, role: &RoleRef) -> bool {
        self.entries.read().iter().any(|entry| &entry.role == role)
    }

    /// Check whether a held role has been activated
    pub fn is_active(&self, role: &RoleRef) -> bool {
        self.entries
            .read()
            .iter()
            .any(|entry| &entry.role == role && entry.active)
    }

    /// Number of held roles
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether the registry holds no roles
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::{EventQueue, EventType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRole {
        activations: Arc<AtomicUsize>,
    }

    impl Role for CountingRole {
        fn name(&self) -> &str {
            "counting"
        }

        fn activate(&self) -> anyhow::Result<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingRole;

    impl Role for FailingRole {
        fn name(&self) -> &str {
            "failing"
        }

        fn activate(&self) -> anyhow::Result<()> {
            anyhow::bail!("no capability")
        }
    }

    fn registry() -> (RoleRegistry, Arc<EventQueue>) {
        let queue = Arc::new(EventQueue::new());
        (RoleRegistry::new(queue.clone()), queue)
    }

    #[test]
    fn test_identity_not_structure() {
        let a = RoleRef::new(NamedRole::new("same"));
        let b = RoleRef::new(NamedRole::new("same"));

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_add_twice_emits_once() {
        let (registry, queue) = registry();
        let role = RoleRef::new(NamedRole::new("r1"));

        assert!(registry.add(role.clone()));
        assert!(!registry.add(role.clone()));

        assert_eq!(registry.len(), 1);
        let events = queue.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RoleAdded);
        assert_eq!(events[0].role(), Some(&role));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (registry, queue) = registry();
        let role = RoleRef::new(NamedRole::new("r1"));

        assert!(!registry.remove(&role));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_present() {
        let (registry, queue) = registry();
        let role = RoleRef::new(NamedRole::new("r1"));
        registry.add(role.clone());
        queue.drain();

        assert!(registry.remove(&role));
        assert!(!registry.contains(&role));
        let events = queue.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RoleRemoved);
    }

    #[test]
    fn test_remove_all_duplicate_input_removes_once() {
        let (registry, queue) = registry();
        let role = RoleRef::new(NamedRole::new("r1"));
        registry.add(role.clone());
        queue.drain();

        assert!(registry.remove_all([&role, &role]));
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn test_activate_all_is_idempotent() {
        let (registry, queue) = registry();
        let activations = Arc::new(AtomicUsize::new(0));
        let role = RoleRef::new(CountingRole {
            activations: activations.clone(),
        });
        registry.add(role.clone());
        queue.drain();

        assert_eq!(registry.activate_all().unwrap(), 1);
        assert_eq!(registry.activate_all().unwrap(), 0);

        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert!(registry.is_active(&role));
        let events = queue.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RoleActivated);
    }

    #[test]
    fn test_activation_failure_keeps_earlier_roles_active() {
        let (registry, queue) = registry();
        let activations = Arc::new(AtomicUsize::new(0));
        let first = RoleRef::new(CountingRole {
            activations: activations.clone(),
        });
        let failing = RoleRef::new(FailingRole);
        registry.add(first.clone());
        registry.add(failing.clone());
        queue.drain();

        let err = registry.activate_all().unwrap_err();
        assert!(err.to_string().contains("failing"));
        assert!(registry.is_active(&first));
        assert!(!registry.is_active(&failing));
        assert_eq!(queue.drain().len(), 1);

        // Retrying does not re-activate the first role
        assert!(registry.activate_all().is_err());
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_readded_role_is_inactive() {
        let (registry, _queue) = registry();
        let role = RoleRef::new(NamedRole::new("r1"));
        registry.add(role.clone());
        registry.activate_all().unwrap();
        registry.remove(&role);
        registry.add(role.clone());

        assert!(!registry.is_active(&role));
    }
}
