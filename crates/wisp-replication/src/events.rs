//! Application event types and local listeners.
//!
//! Event kinds are registered explicitly as string tags. The registration
//! order defines the index sent on the wire, so every peer must register
//! the same tags in the same order. [`EventRegistry::fingerprint`] lets
//! peers detect a mismatch instead of dispatching to the wrong type.

use std::collections::HashMap;

use wisp_transport::PeerHandle;

/// An event as seen by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedEvent<'a> {
    /// Sender.
    pub from: PeerHandle,
    /// Registered tag of the event type.
    pub tag: &'static str,
    /// Opaque serialized event.
    pub payload: &'a [u8],
}

/// Callback invoked for each received event of one type.
pub type EventListener = Box<dyn FnMut(&ReceivedEvent<'_>)>;

/// Errors from the event registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The tag is already in the table.
    #[error("event type `{0}` is already registered")]
    Duplicate(&'static str),

    /// The tag is not in the table.
    #[error("event type `{0}` is not registered")]
    Unregistered(&'static str),

    /// A received index has no entry in the local table.
    #[error("no event type at index {0}")]
    UnknownIndex(u16),

    /// The table already holds `u16::MAX + 1` types.
    #[error("event type table is full")]
    TableFull,
}

/// Ordered event-type table plus per-type listeners.
pub struct EventRegistry {
    tags: Vec<&'static str>,
    listeners: HashMap<u16, Vec<EventListener>>,
    fingerprint: u64,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            tags: Vec::new(),
            listeners: HashMap::new(),
            fingerprint: fingerprint_of(&[]),
        }
    }

    /// Append `tag` to the table and return its index.
    pub fn add_type(&mut self, tag: &'static str) -> Result<u16, EventError> {
        if self.tags.contains(&tag) {
            return Err(EventError::Duplicate(tag));
        }
        let index = u16::try_from(self.tags.len()).map_err(|_| EventError::TableFull)?;
        self.tags.push(tag);
        self.fingerprint = fingerprint_of(&self.tags);
        Ok(index)
    }

    /// Drop every type and listener.
    pub fn clear(&mut self) {
        self.tags.clear();
        self.listeners.clear();
        self.fingerprint = fingerprint_of(&[]);
    }

    /// Index of `tag` in the table.
    pub fn index_of(&self, tag: &str) -> Option<u16> {
        self.tags
            .iter()
            .position(|&registered| registered == tag)
            .and_then(|index| u16::try_from(index).ok())
    }

    /// Tag registered at `index`.
    pub fn tag_of(&self, index: u16) -> Option<&'static str> {
        self.tags.get(usize::from(index)).copied()
    }

    /// Registered tags in table order.
    pub fn tags(&self) -> &[&'static str] {
        &self.tags
    }

    /// Register a listener for events of type `tag`.
    pub fn add_listener(
        &mut self,
        tag: &'static str,
        listener: impl FnMut(&ReceivedEvent<'_>) + 'static,
    ) -> Result<(), EventError> {
        let index = self.index_of(tag).ok_or(EventError::Unregistered(tag))?;
        self.listeners
            .entry(index)
            .or_default()
            .push(Box::new(listener));
        Ok(())
    }

    /// Call every listener registered for the type at `index`. Returns how
    /// many listeners ran.
    pub fn dispatch(
        &mut self,
        index: u16,
        from: PeerHandle,
        payload: &[u8],
    ) -> Result<usize, EventError> {
        let tag = self.tag_of(index).ok_or(EventError::UnknownIndex(index))?;
        let event = ReceivedEvent { from, tag, payload };
        let Some(listeners) = self.listeners.get_mut(&index) else {
            return Ok(0);
        };
        for listener in listeners.iter_mut() {
            listener(&event);
        }
        Ok(listeners.len())
    }

    /// 64-bit fingerprint of the ordered tag table.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// First eight bytes of a BLAKE3 hash over the length-prefixed tags.
fn fingerprint_of(tags: &[&'static str]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(tags.len() as u64).to_le_bytes());
    for tag in tags {
        hasher.update(&(tag.len() as u64).to_le_bytes());
        hasher.update(tag.as_bytes());
    }
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    const PEER: PeerHandle = PeerHandle(4);

    #[test]
    fn test_indices_follow_registration_order() {
        let mut registry = EventRegistry::new();
        assert_eq!(registry.add_type("chat"), Ok(0));
        assert_eq!(registry.add_type("spawn"), Ok(1));
        assert_eq!(registry.index_of("spawn"), Some(1));
        assert_eq!(registry.tag_of(0), Some("chat"));
        assert_eq!(registry.tag_of(2), None);
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut registry = EventRegistry::new();
        registry.add_type("chat").unwrap();
        assert_eq!(registry.add_type("chat"), Err(EventError::Duplicate("chat")));
    }

    #[test]
    fn test_listener_needs_registered_type() {
        let mut registry = EventRegistry::new();
        assert_eq!(
            registry.add_listener("chat", |_| {}),
            Err(EventError::Unregistered("chat"))
        );
    }

    #[test]
    fn test_dispatch_reaches_every_listener() {
        let mut registry = EventRegistry::new();
        registry.add_type("chat").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let seen = Rc::clone(&seen);
            registry
                .add_listener("chat", move |event| {
                    seen.borrow_mut().push((event.from, event.tag, event.payload.to_vec()));
                })
                .unwrap();
        }

        assert_eq!(registry.dispatch(0, PEER, b"hi"), Ok(2));
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[0], (PEER, "chat", b"hi".to_vec()));
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let mut registry = EventRegistry::new();
        registry.add_type("chat").unwrap();
        assert_eq!(registry.dispatch(0, PEER, b""), Ok(0));
        assert_eq!(
            registry.dispatch(3, PEER, b""),
            Err(EventError::UnknownIndex(3))
        );
    }

    #[test]
    fn test_fingerprint_depends_on_order() {
        let mut a = EventRegistry::new();
        let mut b = EventRegistry::new();
        let mut c = EventRegistry::new();
        for tag in ["chat", "spawn"] {
            a.add_type(tag).unwrap();
            b.add_type(tag).unwrap();
        }
        for tag in ["spawn", "chat"] {
            c.add_type(tag).unwrap();
        }
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_separates_tag_boundaries() {
        let mut a = EventRegistry::new();
        let mut b = EventRegistry::new();
        a.add_type("ab").unwrap();
        a.add_type("c").unwrap();
        b.add_type("a").unwrap();
        b.add_type("bc").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_clear_resets_table_and_fingerprint() {
        let mut registry = EventRegistry::new();
        let empty = registry.fingerprint();
        registry.add_type("chat").unwrap();
        registry.add_listener("chat", |_| {}).unwrap();
        assert_ne!(registry.fingerprint(), empty);

        registry.clear();
        assert!(registry.tags().is_empty());
        assert_eq!(registry.fingerprint(), empty);
        assert_eq!(registry.dispatch(0, PEER, b""), Err(EventError::UnknownIndex(0)));
    }
}
