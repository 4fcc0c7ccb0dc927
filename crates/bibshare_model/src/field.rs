//! Field identity.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of one attribute of a bibliographic entry.
///
/// Field names are case-insensitive ("Author" and "author" are the same
/// field) but the original spelling is preserved for display. Equality,
/// ordering, and hashing all operate on the ASCII-lowercased name.
#[derive(Clone)]
pub struct Field {
    name: String,
}

impl Field {
    /// Creates a field from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the field name as originally spelled.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lower_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.name.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lower_bytes().cmp(other.lower_bytes())
    }
}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.lower_bytes() {
            state.write_u8(b);
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl Visitor<'_> for FieldVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a field name string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Field, E> {
                Ok(Field::new(v))
            }
        }

        deserializer.deserialize_str(FieldVisitor)
    }
}

/// Names of the standard fields exercised throughout the engine and tests.
pub mod standard {
    /// Author list.
    pub const AUTHOR: &str = "author";
    /// Title.
    pub const TITLE: &str = "title";
    /// Publication year.
    pub const YEAR: &str = "year";
    /// Journal name.
    pub const JOURNAL: &str = "journal";
    /// Free-form comment.
    pub const COMMENT: &str = "comment";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(field: &Field) -> u64 {
        let mut h = DefaultHasher::new();
        field.hash(&mut h);
        h.finish()
    }

    #[test]
    fn equality_ignores_case() {
        assert_eq!(Field::new("Author"), Field::new("author"));
        assert_eq!(Field::new("YEAR"), Field::new("year"));
        assert_ne!(Field::new("author"), Field::new("editor"));
    }

    #[test]
    fn hash_is_consistent_with_equality() {
        assert_eq!(hash_of(&Field::new("Title")), hash_of(&Field::new("title")));
    }

    #[test]
    fn ordering_ignores_case() {
        let mut fields = vec![Field::new("Year"), Field::new("author"), Field::new("Title")];
        fields.sort();
        let names: Vec<&str> = fields.iter().map(Field::name).collect();
        assert_eq!(names, vec!["author", "Title", "Year"]);
    }

    #[test]
    fn display_preserves_spelling() {
        assert_eq!(Field::new("Author").to_string(), "Author");
    }
}
