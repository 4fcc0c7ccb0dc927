//! Entry identity and the minimal bibliographic record.

use crate::field::Field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a bibliographic entry.
///
/// Entry IDs are 128-bit UUIDs that are:
/// - Stable across local and remote copies of the same entry
/// - Immutable once assigned
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entry ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates an entry ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Converts to a UUID.
    #[must_use]
    pub const fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntryId> for Uuid {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

/// One bibliographic record: an identity, an entry type, and a field map.
///
/// This is the minimum the synchronization core needs — field-level reads
/// and writes under a stable identity. Everything richer (citation keys,
/// cross-references, formatting) lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibEntry {
    /// Stable identity shared by the local and remote copies.
    pub id: EntryId,
    /// Entry type, e.g. "article" or "book".
    pub entry_type: String,
    /// Field values keyed by field name.
    fields: BTreeMap<Field, String>,
}

impl BibEntry {
    /// Creates an empty entry of the given type with a fresh identity.
    #[must_use]
    pub fn new(entry_type: impl Into<String>) -> Self {
        Self::with_id(EntryId::new(), entry_type)
    }

    /// Creates an empty entry with an explicit identity.
    #[must_use]
    pub fn with_id(id: EntryId, entry_type: impl Into<String>) -> Self {
        Self {
            id,
            entry_type: entry_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn field(&self, field: &Field) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Sets a field value, returning the previous value.
    pub fn set_field(&mut self, field: Field, value: impl Into<String>) -> Option<String> {
        self.fields.insert(field, value.into())
    }

    /// Removes a field, returning the previous value.
    pub fn remove_field(&mut self, field: &Field) -> Option<String> {
        self.fields.remove(field)
    }

    /// Iterates over all fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&Field, &str)> {
        self.fields.iter().map(|(f, v)| (f, v.as_str()))
    }

    /// Returns the number of set fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::standard;

    #[test]
    fn entry_id_roundtrip() {
        let id = EntryId::new();
        assert_eq!(EntryId::from_bytes(*id.as_bytes()), id);
        assert_eq!(EntryId::from_uuid(id.to_uuid()), id);
    }

    #[test]
    fn entry_ids_are_unique() {
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn set_and_get_fields() {
        let mut entry = BibEntry::new("article");
        assert_eq!(entry.set_field(Field::new(standard::AUTHOR), "Knuth"), None);
        assert_eq!(
            entry.set_field(Field::new(standard::AUTHOR), "Lamport"),
            Some("Knuth".into())
        );
        assert_eq!(entry.field(&Field::new(standard::AUTHOR)), Some("Lamport"));
        assert_eq!(entry.field(&Field::new(standard::TITLE)), None);
        assert_eq!(entry.field_count(), 1);
    }

    #[test]
    fn field_lookup_is_case_insensitive() {
        let mut entry = BibEntry::new("article");
        entry.set_field(Field::new("Author"), "Knuth");
        assert_eq!(entry.field(&Field::new("author")), Some("Knuth"));
    }

    #[test]
    fn remove_field() {
        let mut entry = BibEntry::new("book");
        entry.set_field(Field::new(standard::YEAR), "1984");
        assert_eq!(
            entry.remove_field(&Field::new(standard::YEAR)),
            Some("1984".into())
        );
        assert_eq!(entry.remove_field(&Field::new(standard::YEAR)), None);
    }

    #[test]
    fn serde_roundtrip() {
        let mut entry = BibEntry::new("article");
        entry.set_field(Field::new(standard::TITLE), "On Shared Databases");
        let json = serde_json::to_string(&entry).unwrap();
        let back: BibEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
