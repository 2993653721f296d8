//! Relative-to-now timers owned by the engine. The host only asks for the next
//! deadline and hands back `now`; no callbacks are registered anywhere.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// One pending deadline per key. Re-arming a key replaces its deadline.
pub struct TimerQueue<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K: Copy + Eq + Hash + Ord> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }

    pub fn arm(&mut self, key: K, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key due at `now`, earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, &at)| at <= now)
            .map(|(&k, &at)| (at, k))
            .collect();
        due.sort();
        for (_, k) in &due {
            self.deadlines.remove(k);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }
}

impl<K: Copy + Eq + Hash + Ord> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rearm_slides_deadline() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.arm(1u32, t0 + Duration::from_secs(2));
        q.arm(1u32, t0 + Duration::from_secs(5));
        assert!(q.expired(t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(q.expired(t0 + Duration::from_secs(5)), vec![1]);
        assert!(!q.is_armed(&1));
    }

    #[test]
    fn expired_in_deadline_order() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.arm(7u32, t0 + Duration::from_millis(30));
        q.arm(3u32, t0 + Duration::from_millis(10));
        q.arm(5u32, t0 + Duration::from_millis(20));
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert_eq!(q.expired(t0 + Duration::from_millis(50)), vec![3, 5, 7]);
        assert_eq!(q.next_deadline(), None);
    }
}
