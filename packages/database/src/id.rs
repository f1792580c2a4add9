//! Time-ordered unique ids for primary keys.
//!
//! An id is 50 characters: the Unix time in milliseconds zero-padded to 15
//! digits, the 32 hex digits of a random UUID, then `000`. Ids created in a
//! later millisecond sort after ids created in an earlier one.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub const ID_LEN: usize = 50;

#[must_use]
pub fn next_id() -> String {
    next_id_at(SystemTime::now())
}

/// Same as [`next_id`] with `time` as the timestamp. Times before the Unix
/// epoch clamp to zero.
#[must_use]
pub fn next_id_at(time: SystemTime) -> String {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    format!("{millis:015}{}000", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn has_fixed_layout() {
        let id = next_id_at(UNIX_EPOCH + Duration::from_millis(1_234));

        assert_eq!(id.len(), ID_LEN);
        assert!(id.starts_with("000000000001234"));
        assert!(id.ends_with("000"));
        assert!(id[15..47].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test_log::test]
    fn later_ids_sort_after_earlier_ones() {
        let earlier = next_id_at(UNIX_EPOCH + Duration::from_millis(1_700_000_000_000));
        let later = next_id_at(UNIX_EPOCH + Duration::from_millis(1_700_000_000_001));

        assert!(earlier < later);
    }

    #[test_log::test]
    fn ids_are_unique() {
        let ids = (0..100).map(|_| next_id()).collect::<std::collections::BTreeSet<_>>();

        assert_eq!(ids.len(), 100);
    }
}
