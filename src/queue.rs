//! C4: per-stake matchmaking queues with priority insertion, wait-time
//! estimates and an advisory lock the matchmaker (C5) uses to avoid
//! racing itself (§4.4).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::QueueError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
    Vip,
}

#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub username: String,
    pub priority: Priority,
    pub joined_at: Instant,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueStats {
    pub waiting: usize,
    pub estimated_wait: Duration,
}

const EXPIRY: Duration = Duration::from_secs(10 * 60);
const DEFAULT_WAIT: Duration = Duration::from_secs(30);
const WAIT_HISTORY_CAP: usize = 50;

struct StakeQueue {
    entries: VecDeque<QueueEntry>,
    recent_waits: VecDeque<Duration>,
    lock: Arc<Mutex<()>>,
}

impl StakeQueue {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            recent_waits: VecDeque::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|e| now.duration_since(e.joined_at) < EXPIRY);
    }

    fn average_wait(&self) -> Duration {
        if self.recent_waits.is_empty() {
            return DEFAULT_WAIT;
        }
        let total: Duration = self.recent_waits.iter().sum();
        total / self.recent_waits.len() as u32
    }

    fn record_wait(&mut self, wait: Duration) {
        self.recent_waits.push_back(wait);
        if self.recent_waits.len() > WAIT_HISTORY_CAP {
            self.recent_waits.pop_front();
        }
    }
}

/// Queues keyed by stake level. Each stake's queue has its own advisory
/// lock so the matchmaker can serialize its own critical sections per
/// stake without blocking unrelated stakes.
#[derive(Clone)]
pub struct QueueManager {
    stakes: Arc<std::sync::Mutex<HashMap<u64, StakeQueue>>>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            stakes: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Per-stake advisory lock handle for the matchmaker's critical
    /// section (§4.4, §4.5). Re-entrant runs of the matchmaker on the
    /// same stake simply wait for the previous run's lock to drop.
    pub fn lock_for(&self, stake: u64) -> Arc<Mutex<()>> {
        let mut stakes = self.stakes.lock().expect("queue map poisoned");
        stakes.entry(stake).or_insert_with(StakeQueue::new).lock.clone()
    }

    pub fn enqueue(&self, stake: u64, username: &str, priority: Priority) -> Result<(), QueueError> {
        let mut stakes = self.stakes.lock().expect("queue map poisoned");
        let q = stakes.entry(stake).or_insert_with(StakeQueue::new);
        q.purge_expired(Instant::now());
        if q.entries.iter().any(|e| e.username == username) {
            return Err(QueueError::AlreadyQueued(username.to_string()));
        }
        // Priority-high insertions go before all normal entries but
        // after existing same-or-higher priority entries (stable).
        let insert_at = q
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(q.entries.len());
        q.entries.insert(
            insert_at,
            QueueEntry {
                username: username.to_string(),
                priority,
                joined_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn dequeue(&self, stake: u64) -> Option<QueueEntry> {
        let mut stakes = self.stakes.lock().expect("queue map poisoned");
        let q = stakes.get_mut(&stake)?;
        q.purge_expired(Instant::now());
        let entry = q.entries.pop_front()?;
        q.record_wait(Instant::now().duration_since(entry.joined_at));
        Some(entry)
    }

    pub fn remove(&self, stake: u64, username: &str) -> Result<(), QueueError> {
        let mut stakes = self.stakes.lock().expect("queue map poisoned");
        let q = stakes.get_mut(&stake).ok_or_else(|| QueueError::NotQueued(username.to_string()))?;
        let before = q.entries.len();
        q.entries.retain(|e| e.username != username);
        if q.entries.len() == before {
            return Err(QueueError::NotQueued(username.to_string()));
        }
        Ok(())
    }

    pub fn position(&self, stake: u64, username: &str) -> Option<usize> {
        let stakes = self.stakes.lock().expect("queue map poisoned");
        let q = stakes.get(&stake)?;
        q.entries.iter().position(|e| e.username == username)
    }

    /// Rolling average of the last <=50 actual wait times, scaled by
    /// `max(1, pos/2)` (§4.4 "Wait-time estimate").
    pub fn estimated_wait(&self, stake: u64, username: &str) -> Duration {
        let stakes = self.stakes.lock().expect("queue map poisoned");
        let Some(q) = stakes.get(&stake) else {
            return DEFAULT_WAIT;
        };
        let Some(pos) = q.entries.iter().position(|e| e.username == username) else {
            return DEFAULT_WAIT;
        };
        let multiplier = std::cmp::max(1, pos / 2) as u32;
        q.average_wait() * multiplier
    }

    pub fn stats(&self, stake: u64) -> QueueStats {
        let stakes = self.stakes.lock().expect("queue map poisoned");
        match stakes.get(&stake) {
            Some(q) => QueueStats {
                waiting: q.entries.len(),
                estimated_wait: q.average_wait(),
            },
            None => QueueStats::default(),
        }
    }

    /// Background sweep: drop entries older than 10 minutes (§4.4
    /// "Expiry"). Intended to run on a timer alongside the matchmaker.
    pub fn sweep_expired(&self) {
        let mut stakes = self.stakes.lock().expect("queue map poisoned");
        let now = Instant::now();
        for q in stakes.values_mut() {
            q.purge_expired(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_for_equal_priority() {
        let q = QueueManager::new();
        q.enqueue(10, "a", Priority::Normal).unwrap();
        q.enqueue(10, "b", Priority::Normal).unwrap();
        assert_eq!(q.dequeue(10).unwrap().username, "a");
        assert_eq!(q.dequeue(10).unwrap().username, "b");
    }

    #[test]
    fn high_priority_jumps_ahead_of_normal_but_not_vip() {
        let q = QueueManager::new();
        q.enqueue(10, "vip1", Priority::Vip).unwrap();
        q.enqueue(10, "normal1", Priority::Normal).unwrap();
        q.enqueue(10, "high1", Priority::High).unwrap();
        let order: Vec<_> = std::iter::from_fn(|| q.dequeue(10).map(|e| e.username)).collect();
        assert_eq!(order, vec!["vip1", "high1", "normal1"]);
    }

    #[test]
    fn duplicate_enqueue_rejected() {
        let q = QueueManager::new();
        q.enqueue(10, "a", Priority::Normal).unwrap();
        assert!(matches!(
            q.enqueue(10, "a", Priority::Normal),
            Err(QueueError::AlreadyQueued(_))
        ));
    }

    #[test]
    fn remove_unknown_user_is_an_error() {
        let q = QueueManager::new();
        assert!(matches!(q.remove(10, "ghost"), Err(QueueError::NotQueued(_))));
    }

    #[test]
    fn default_wait_before_any_history() {
        let q = QueueManager::new();
        q.enqueue(10, "a", Priority::Normal).unwrap();
        assert_eq!(q.estimated_wait(10, "a"), DEFAULT_WAIT);
    }
}
