use crate::{AppError, AppResult};

/// Derive the canonical room id for a pair of users: sort the two ids and
/// join with `:`. Symmetric, so every client viewing the same pair computes
/// the same room. User ids are UUIDs and never contain `:`, which keeps the
/// encoding collision-free.
pub fn resolve(a: &str, b: &str) -> AppResult<String> {
    if a.is_empty() || b.is_empty() {
        return Err(AppError::validation("a room needs two user ids"));
    }
    if a == b {
        return Err(AppError::validation("cannot open a room with yourself"));
    }

    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{lo}:{hi}"))
}

/// Inverse of [`resolve`]: the two participants of a room id.
pub fn participants(room_id: &str) -> Option<(&str, &str)> {
    room_id.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;

    #[test]
    fn resolve_is_symmetric() {
        assert_eq!(resolve("alice", "bob").unwrap(), resolve("bob", "alice").unwrap());
        assert_eq!(resolve("alice", "bob").unwrap(), "alice:bob");
    }

    #[test]
    fn resolve_is_unique_per_pair() {
        let ab = resolve("a", "b").unwrap();
        let ac = resolve("a", "c").unwrap();
        let bc = resolve("b", "c").unwrap();
        assert_ne!(ab, ac);
        assert_ne!(ab, bc);
        assert_ne!(ac, bc);
    }

    #[test]
    fn resolve_rejects_empty_and_self() {
        assert!(matches!(resolve("", "b"), Err(AppError::Validation(_))));
        assert!(matches!(resolve("a", ""), Err(AppError::Validation(_))));
        assert!(matches!(resolve("a", "a"), Err(AppError::Validation(_))));
    }

    #[test]
    fn participants_round_trip() {
        let room = resolve("bob", "alice").unwrap();
        assert_eq!(participants(&room), Some(("alice", "bob")));
        assert_eq!(participants("no-separator"), None);
    }
}
