//! Time-ordered identifier generation.
//!
//! Command and event ids must be monotonic enough that listing by id
//! approximates ingestion order even without consulting broker offsets.
//! UUIDv7 embeds a millisecond Unix timestamp in its most significant
//! bits, so lexicographic (and numeric) ordering of freshly generated ids
//! tracks wall-clock order without requiring node/MAC state the way
//! UUIDv1 does.

use uuid::Uuid;

/// Generate a new time-ordered id for a [`crate::command::Command`] or
/// [`crate::event::Event`].
#[must_use]
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::new_id;

    #[test]
    fn generated_ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_sort_with_generation_order() {
        let mut ids = Vec::new();
        for _ in 0..16 {
            ids.push(new_id());
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "UUIDv7 ids should already be in generation order");
    }
}
