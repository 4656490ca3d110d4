//! Shared per-instance memory and the process-wide global store.
//!
//! A [`Blackboard`] is a heterogeneous, name-keyed store visible to every
//! node of one tree instance. Entries come in three flavors:
//!
//! - plain values owned by the blackboard,
//! - externally bound entries proxying host getters/setters,
//! - global entries resolving against the process-wide [`GlobalStore`].
//!
//! Whether a name is global is decided by an explicit flag at declaration
//! time, never by lexical fallback: a local entry and a global entry with the
//! same name do not shadow each other.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

/// A dynamically typed blackboard value.
pub type Value = Box<dyn Any + Send>;

type Getter = Box<dyn Fn() -> Value + Send>;
type Setter = Box<dyn FnMut(Value) + Send>;
type Observer = Box<dyn FnMut(KeyEvent<'_>) + Send>;

/// Blackboard change event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Add,
    Remove,
    Change,
}

/// Blackboard key event delivered to observers.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent<'a> {
    pub kind: KeyEventKind,
    pub key: &'a str,
}

enum Slot {
    /// An owned value; `None` while the key exists but is unset.
    Value(Option<Value>),
    /// Reads and writes proxy to host accessors.
    Bound { get: Getter, set: Setter },
    /// Reads and writes resolve against the process-wide store.
    Global,
}

/// A heterogeneous dictionary storing the shared data of one tree instance.
#[derive(Default)]
pub struct Blackboard {
    slots: HashMap<String, Slot>,
    observers: Vec<Observer>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, creating the entry if missing.
    ///
    /// Bound entries forward to their setter; global entries write to the
    /// [`GlobalStore`]. Values are not compared, so writing to an existing
    /// key always reports a change.
    pub fn set<T: Any + Send>(&mut self, key: &str, value: T) {
        self.set_value(key, Box::new(value));
    }

    /// [`set`](Self::set) for an already boxed value.
    pub fn set_value(&mut self, key: &str, value: Value) {
        match self.slots.get_mut(key) {
            None => {
                self.slots.insert(key.to_string(), Slot::Value(Some(value)));
                self.notify(KeyEventKind::Add, key);
            }
            Some(Slot::Value(slot)) => {
                *slot = Some(value);
                self.notify(KeyEventKind::Change, key);
            }
            Some(Slot::Bound { set, .. }) => {
                set(value);
                self.notify(KeyEventKind::Change, key);
            }
            Some(Slot::Global) => {
                GlobalStore::set_value(key, value);
                self.notify(KeyEventKind::Change, key);
            }
        }
    }

    /// Gets the value at `key`.
    ///
    /// Returns `None` when the key is missing, unset, or holds a different
    /// type. Use [`get_or_default`](Self::get_or_default) for the common
    /// "missing means default" read.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        match self.slots.get(key)? {
            Slot::Value(slot) => slot.as_ref()?.downcast_ref::<T>().cloned(),
            Slot::Bound { get, .. } => get().downcast::<T>().ok().map(|v| *v),
            Slot::Global => GlobalStore::get::<T>(key),
        }
    }

    /// Gets the value at `key`, falling back to `T::default()`.
    ///
    /// A missing key is not an error; nodes routinely read keys the host has
    /// not populated yet.
    pub fn get_or_default<T: Any + Clone + Default>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    /// Clears the value at `key` while keeping the key declared.
    pub fn unset(&mut self, key: &str) {
        if let Some(Slot::Value(slot)) = self.slots.get_mut(key) {
            if slot.take().is_some() {
                self.notify(KeyEventKind::Change, key);
            }
        }
    }

    /// Removes the key from the blackboard entirely.
    pub fn remove(&mut self, key: &str) {
        if self.slots.remove(key).is_some() {
            self.notify(KeyEventKind::Remove, key);
        }
    }

    /// Check if the key exists in the blackboard.
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Does the key exist and hold a value?
    pub fn is_set(&self, key: &str) -> bool {
        match self.slots.get(key) {
            None => false,
            Some(Slot::Value(slot)) => slot.is_some(),
            Some(Slot::Bound { .. }) => true,
            Some(Slot::Global) => GlobalStore::contains(key),
        }
    }

    /// Declares `key` as externally bound; reads call `get`, writes call
    /// `set`. Replaces any existing entry under that name.
    pub fn bind(
        &mut self,
        key: &str,
        get: impl Fn() -> Value + Send + 'static,
        set: impl FnMut(Value) + Send + 'static,
    ) {
        let added = self
            .slots
            .insert(
                key.to_string(),
                Slot::Bound { get: Box::new(get), set: Box::new(set) },
            )
            .is_none();
        let kind = if added { KeyEventKind::Add } else { KeyEventKind::Change };
        self.notify(kind, key);
    }

    /// Declares `key` as resolving against the process-wide [`GlobalStore`].
    pub fn declare_global(&mut self, key: &str) {
        let added = self.slots.insert(key.to_string(), Slot::Global).is_none();
        let kind = if added { KeyEventKind::Add } else { KeyEventKind::Change };
        self.notify(kind, key);
    }

    /// The number of declared keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn add_observer(&mut self, observer: impl FnMut(KeyEvent<'_>) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, kind: KeyEventKind, key: &str) {
        for observer in &mut self.observers {
            observer(KeyEvent { kind, key });
        }
    }
}

static GLOBAL_STORE: Mutex<Option<HashMap<String, Value>>> = Mutex::new(None);

/// The process-wide store backing global blackboard entries.
///
/// Lifetime is explicit: [`init`](GlobalStore::init) before any global entry
/// is read or written, [`teardown`](GlobalStore::teardown) when the host
/// shuts the engine down. Writes before `init` are dropped with a warning so
/// initialization order stays deterministic instead of racing on first use.
pub struct GlobalStore;

impl GlobalStore {
    /// Initializes (or re-initializes) the store to empty.
    pub fn init() {
        *Self::lock() = Some(HashMap::new());
    }

    /// Drops the store and every value in it.
    pub fn teardown() {
        *Self::lock() = None;
    }

    pub fn is_initialized() -> bool {
        Self::lock().is_some()
    }

    pub fn set<T: Any + Send>(key: &str, value: T) {
        Self::set_value(key, Box::new(value));
    }

    pub fn set_value(key: &str, value: Value) {
        match Self::lock().as_mut() {
            Some(store) => {
                store.insert(key.to_string(), value);
            }
            None => {
                tracing::warn!(key, "global store write before init; value dropped");
            }
        }
    }

    pub fn get<T: Any + Clone>(key: &str) -> Option<T> {
        Self::lock()
            .as_ref()?
            .get(key)?
            .downcast_ref::<T>()
            .cloned()
    }

    pub fn contains(key: &str) -> bool {
        Self::lock()
            .as_ref()
            .is_some_and(|store| store.contains_key(key))
    }

    pub fn remove(key: &str) {
        if let Some(store) = Self::lock().as_mut() {
            store.remove(key);
        }
    }

    fn lock() -> std::sync::MutexGuard<'static, Option<HashMap<String, Value>>> {
        GLOBAL_STORE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn set_get_roundtrip_and_defaults() {
        let mut bb = Blackboard::new();
        bb.set("hp", 30u32);
        assert_eq!(bb.get::<u32>("hp"), Some(30));
        // Wrong type reads as missing.
        assert_eq!(bb.get::<i64>("hp"), None);
        // Missing key falls back to the type default.
        assert_eq!(bb.get_or_default::<u32>("mp"), 0);
    }

    #[test]
    fn unset_keeps_key_remove_drops_it() {
        let mut bb = Blackboard::new();
        bb.set("target", "goblin".to_string());
        bb.unset("target");
        assert!(bb.contains("target"));
        assert!(!bb.is_set("target"));

        bb.remove("target");
        assert!(!bb.contains("target"));
    }

    #[test]
    fn observers_see_add_change_remove() {
        let events: Arc<Mutex<Vec<(KeyEventKind, String)>>> = Arc::default();
        let sink = Arc::clone(&events);

        let mut bb = Blackboard::new();
        bb.add_observer(move |e| {
            sink.lock().unwrap().push((e.kind, e.key.to_string()));
        });

        bb.set("k", 1i32);
        bb.set("k", 2i32);
        bb.remove("k");

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (KeyEventKind::Add, "k".to_string()),
                (KeyEventKind::Change, "k".to_string()),
                (KeyEventKind::Remove, "k".to_string()),
            ]
        );
    }

    #[test]
    fn bound_entries_proxy_host_accessors() {
        let host = Arc::new(Mutex::new(5i32));

        let read = Arc::clone(&host);
        let write = Arc::clone(&host);
        let mut bb = Blackboard::new();
        bb.bind(
            "ammo",
            move || Box::new(*read.lock().unwrap()) as Value,
            move |v| {
                if let Ok(v) = v.downcast::<i32>() {
                    *write.lock().unwrap() = *v;
                }
            },
        );

        assert_eq!(bb.get::<i32>("ammo"), Some(5));
        bb.set("ammo", 2i32);
        assert_eq!(*host.lock().unwrap(), 2);
        assert_eq!(bb.get::<i32>("ammo"), Some(2));
    }

    #[test]
    fn rebinding_an_existing_key_notifies_change() {
        let events: Arc<Mutex<Vec<(KeyEventKind, String)>>> = Arc::default();
        let sink = Arc::clone(&events);

        let mut bb = Blackboard::new();
        bb.add_observer(move |e| {
            sink.lock().unwrap().push((e.kind, e.key.to_string()));
        });

        bb.set("ammo", 3i32);
        // The key already exists, so replacing it with a binding is a
        // change, not an addition.
        bb.bind("ammo", || Box::new(7i32) as Value, |_| {});

        assert_eq!(bb.get::<i32>("ammo"), Some(7));
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (KeyEventKind::Add, "ammo".to_string()),
                (KeyEventKind::Change, "ammo".to_string()),
            ]
        );
    }

    #[test]
    fn global_entries_resolve_against_global_store() {
        GlobalStore::init();

        let mut bb = Blackboard::new();
        bb.declare_global("alarm");
        bb.set("alarm", true);
        assert_eq!(GlobalStore::get::<bool>("alarm"), Some(true));

        // A second instance sees the same entry.
        let mut other = Blackboard::new();
        other.declare_global("alarm");
        assert_eq!(other.get::<bool>("alarm"), Some(true));

        GlobalStore::teardown();
        assert!(!GlobalStore::is_initialized());
        assert_eq!(other.get::<bool>("alarm"), None);
    }
}
