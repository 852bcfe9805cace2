//! Sortable identifier generation.
//!
//! Session and checkpoint ids encode their creation time in a zero-padded
//! millisecond prefix, so lexicographic order is chronological order. The
//! random suffix disambiguates ids minted within the same millisecond.

use chrono::Utc;
use uuid::Uuid;

/// Generates sortable ids for sessions and checkpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn millis() -> i64 {
        Utc::now().timestamp_millis().max(0)
    }

    /// Mint a session id: `sess-<millis>-<uuid prefix>`.
    #[must_use]
    pub fn session_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("sess-{:013}-{}", Self::millis(), &suffix[..8])
    }

    /// Mint a checkpoint id: `cp-<millis>-<random>`.
    #[must_use]
    pub fn checkpoint_id(&self) -> String {
        format!("cp-{:013}-{:08x}", Self::millis(), rand::random::<u32>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_chronologically() {
        let generator = IdGenerator::new();
        let a = generator.session_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generator.session_id();
        assert!(a < b, "expected {a} < {b}");
    }

    #[test]
    fn ids_are_unique_within_a_millisecond() {
        let generator = IdGenerator::new();
        let ids: Vec<String> = (0..32).map(|_| generator.checkpoint_id()).collect();
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
