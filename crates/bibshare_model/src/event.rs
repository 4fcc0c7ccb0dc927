//! Field-level change events.

use crate::entry::EntryId;
use crate::field::Field;

/// Where a change originated.
///
/// A change is either LOCAL (made by this application instance) or REMOTE
/// (received from the shared store) — never both. The origin is what lets
/// the synchronizer avoid echoing a change back to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// The change was made by this application instance.
    Local,
    /// The change arrived from the shared remote store.
    Remote,
}

/// An immutable record of one field-level mutation.
///
/// `old_value`/`new_value` of `None` mean the field did not exist on that
/// side. `magnitude` is computed once at construction via
/// [`change_magnitude`] and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Identity of the affected entry.
    pub entry_id: EntryId,
    /// The changed field.
    pub field: Field,
    /// Value before the change, `None` if the field was absent.
    pub old_value: Option<String>,
    /// Value after the change, `None` if the field was removed.
    pub new_value: Option<String>,
    /// Heuristic size of the edit.
    pub magnitude: usize,
    /// Which side of the connection produced the change.
    pub origin: ChangeOrigin,
}

impl ChangeEvent {
    /// Creates an event with the given origin.
    #[must_use]
    pub fn new(
        entry_id: EntryId,
        field: Field,
        old_value: Option<String>,
        new_value: Option<String>,
        origin: ChangeOrigin,
    ) -> Self {
        let magnitude = change_magnitude(old_value.as_deref(), new_value.as_deref());
        Self {
            entry_id,
            field,
            old_value,
            new_value,
            magnitude,
            origin,
        }
    }

    /// Creates a locally originated event.
    #[must_use]
    pub fn local(
        entry_id: EntryId,
        field: Field,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self::new(entry_id, field, old_value, new_value, ChangeOrigin::Local)
    }

    /// Creates a remotely originated event.
    #[must_use]
    pub fn remote(
        entry_id: EntryId,
        field: Field,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self::new(entry_id, field, old_value, new_value, ChangeOrigin::Remote)
    }

    /// Returns true if the event carries no actual change.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.old_value == self.new_value
    }
}

/// Quantifies how much a field value changed.
///
/// This is a heuristic proxy for edit size, not an edit distance:
/// - equal values (including both absent) → 0
/// - one side absent → character count of the present side
/// - both present with equal character counts → the new value's count
/// - both present with different counts → the absolute difference
///
/// Lengths are Unicode scalar counts, not byte counts.
#[must_use]
pub fn change_magnitude(old_value: Option<&str>, new_value: Option<&str>) -> usize {
    match (old_value, new_value) {
        (old, new) if old == new => 0,
        (None, Some(new)) => new.chars().count(),
        (Some(old), None) => old.chars().count(),
        (Some(old), Some(new)) => {
            let old_len = old.chars().count();
            let new_len = new.chars().count();
            if old_len == new_len {
                new_len
            } else {
                old_len.abs_diff(new_len)
            }
        }
        // Both absent is covered by the equality arm.
        (None, None) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::standard;
    use proptest::prelude::*;

    #[test]
    fn equal_values_have_zero_magnitude() {
        assert_eq!(change_magnitude(None, None), 0);
        assert_eq!(change_magnitude(Some("abc"), Some("abc")), 0);
        assert_eq!(change_magnitude(Some(""), Some("")), 0);
    }

    #[test]
    fn absent_side_uses_present_length() {
        assert_eq!(change_magnitude(None, Some("hello")), 5);
        assert_eq!(change_magnitude(Some("hello"), None), 5);
        assert_eq!(change_magnitude(None, Some("")), 0);
    }

    #[test]
    fn equal_lengths_use_new_length() {
        // "2020" -> "2021": same length, magnitude is the new length.
        assert_eq!(change_magnitude(Some("2020"), Some("2021")), 4);
        assert_eq!(change_magnitude(Some("ab"), Some("cd")), 2);
    }

    #[test]
    fn unequal_lengths_use_absolute_difference() {
        assert_eq!(change_magnitude(Some("short"), Some("a longer value")), 9);
        assert_eq!(change_magnitude(Some("a longer value"), Some("short")), 9);
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        assert_eq!(change_magnitude(None, Some("héllo")), 5);
    }

    #[test]
    fn comment_edit_scenario() {
        let event = ChangeEvent::local(
            EntryId::new(),
            Field::new(standard::COMMENT),
            Some("".into()),
            Some("hello".into()),
        );
        assert_eq!(event.magnitude, 5);
        assert_eq!(event.origin, ChangeOrigin::Local);
        assert!(!event.is_noop());
    }

    #[test]
    fn noop_event() {
        let event = ChangeEvent::remote(
            EntryId::new(),
            Field::new(standard::YEAR),
            Some("2020".into()),
            Some("2020".into()),
        );
        assert!(event.is_noop());
        assert_eq!(event.magnitude, 0);
    }

    proptest! {
        #[test]
        fn magnitude_zero_iff_no_visible_change(old in proptest::option::of(".{0,40}"), new in proptest::option::of(".{0,40}")) {
            let m = change_magnitude(old.as_deref(), new.as_deref());
            // Zero exactly when the values are equal, or one side is absent
            // and the other is the empty string.
            let expect_zero = old == new
                || (old.is_none() && new.as_deref() == Some(""))
                || (new.is_none() && old.as_deref() == Some(""));
            prop_assert_eq!(m == 0, expect_zero);
        }

        #[test]
        fn magnitude_is_symmetric_for_unequal_lengths(old in ".{0,40}", new in ".{0,40}") {
            prop_assume!(old.chars().count() != new.chars().count());
            prop_assert_eq!(
                change_magnitude(Some(&old), Some(&new)),
                change_magnitude(Some(&new), Some(&old))
            );
        }

        #[test]
        fn magnitude_matches_definition(old in ".{0,40}", new in ".{0,40}") {
            let m = change_magnitude(Some(&old), Some(&new));
            let (ol, nl) = (old.chars().count(), new.chars().count());
            if old == new {
                prop_assert_eq!(m, 0);
            } else if ol == nl {
                prop_assert_eq!(m, nl);
            } else {
                prop_assert_eq!(m, ol.abs_diff(nl));
            }
        }
    }
}
