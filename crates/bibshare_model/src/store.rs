//! Local entry store.

use crate::entry::{BibEntry, EntryId};
use crate::event::{ChangeEvent, ChangeOrigin};
use crate::feed::ChangeFeed;
use crate::field::Field;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The materialized local copy of the shared database.
///
/// This trait is the sole coupling surface between the synchronization
/// core and the rest of the application's data model: local edits flow
/// out through the store's [`ChangeFeed`] as LOCAL events, and the
/// synchronizer mutates the store through [`apply_remote`].
///
/// [`apply_remote`]: EntryStore::apply_remote
pub trait EntryStore: Send + Sync {
    /// Returns a copy of the entry, if present.
    fn get(&self, id: &EntryId) -> Option<BibEntry>;

    /// Returns copies of all entries.
    fn entries(&self) -> Vec<BibEntry>;

    /// Inserts an entry, emitting a LOCAL event per populated field.
    fn insert(&self, entry: BibEntry);

    /// Applies a local edit: sets (`Some`) or removes (`None`) a field.
    ///
    /// Emits and returns the LOCAL event, or `None` when the value is
    /// unchanged or the entry does not exist.
    fn set_field(&self, id: &EntryId, field: Field, value: Option<String>) -> Option<ChangeEvent>;

    /// Applies a REMOTE change event.
    ///
    /// The application is idempotent: if the store already holds the
    /// event's new value, nothing changes and nothing is emitted.
    /// Returns true if the store was mutated. An entry unknown to the
    /// store is created on first contact.
    fn apply_remote(&self, event: &ChangeEvent) -> bool;

    /// The feed carrying every mutation of this store.
    fn feed(&self) -> &ChangeFeed;
}

/// In-memory [`EntryStore`] implementation.
///
/// Serves as the default local copy and as the store the engine tests run
/// against.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<EntryId, BibEntry>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            feed: ChangeFeed::new(),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EntryStore for MemoryStore {
    fn get(&self, id: &EntryId) -> Option<BibEntry> {
        self.entries.read().get(id).cloned()
    }

    fn entries(&self) -> Vec<BibEntry> {
        self.entries.read().values().cloned().collect()
    }

    fn insert(&self, entry: BibEntry) {
        let events: Vec<ChangeEvent> = entry
            .fields()
            .map(|(field, value)| {
                ChangeEvent::local(entry.id, field.clone(), None, Some(value.to_string()))
            })
            .collect();
        self.entries.write().insert(entry.id, entry);
        self.feed.emit_batch(events);
    }

    fn set_field(&self, id: &EntryId, field: Field, value: Option<String>) -> Option<ChangeEvent> {
        let event = {
            let mut entries = self.entries.write();
            let entry = entries.get_mut(id)?;
            let old = entry.field(&field).map(str::to_string);
            if old == value {
                return None;
            }
            match &value {
                Some(v) => {
                    entry.set_field(field.clone(), v.clone());
                }
                None => {
                    entry.remove_field(&field);
                }
            }
            ChangeEvent::local(*id, field, old, value)
        };
        self.feed.emit(event.clone());
        Some(event)
    }

    fn apply_remote(&self, event: &ChangeEvent) -> bool {
        debug_assert_eq!(event.origin, ChangeOrigin::Remote);
        {
            let mut entries = self.entries.write();
            let entry = entries
                .entry(event.entry_id)
                .or_insert_with(|| BibEntry::with_id(event.entry_id, "misc"));
            let current = entry.field(&event.field).map(str::to_string);
            if current == event.new_value {
                return false;
            }
            match &event.new_value {
                Some(v) => {
                    entry.set_field(event.field.clone(), v.clone());
                }
                None => {
                    entry.remove_field(&event.field);
                }
            }
        }
        self.feed.emit(event.clone());
        true
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .finish()
    }
}
