use serde::{Deserialize, Serialize};

pub type TimerId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTimer<T> {
    pub id: TimerId,
    pub payload: T,
    pub deadline: u64,
    pub scheduled_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_scheduled: u32,
    pub total_fired: u32,
    pub total_cancelled: u32,
    pub currently_scheduled: u32,
}

/// Deadline-ordered one-shot timers for a cooperative event loop.
///
/// Nothing runs on its own: the loop calls [`TimerScheduler::take_due`] with
/// the current time and acts on whatever comes back. A timer that wants to
/// repeat is scheduled again by its owner.
#[derive(Debug)]
pub struct TimerScheduler<T> {
    timers: Vec<ScheduledTimer<T>>,
    next_id: TimerId,
    stats: SchedulerStats,
}

impl<T> TimerScheduler<T> {
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_id: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Schedule `payload` to come due at `deadline`
    pub fn schedule(&mut self, payload: T, deadline: u64, current_time: u64) -> TimerId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;

        // Insert in chronological order; equal deadlines keep scheduling order
        let insert_position = self.timers
            .iter()
            .position(|timer| timer.deadline > deadline)
            .unwrap_or(self.timers.len());

        self.timers.insert(insert_position, ScheduledTimer {
            id,
            payload,
            deadline,
            scheduled_at: current_time,
        });

        self.stats.total_scheduled += 1;
        self.stats.currently_scheduled = self.timers.len() as u32;
        id
    }

    /// Schedule `payload` to come due `delay_ms` after `current_time`
    pub fn schedule_in(&mut self, payload: T, delay_ms: u64, current_time: u64) -> TimerId {
        self.schedule(payload, current_time.saturating_add(delay_ms), current_time)
    }

    /// Cancel a timer. Cancelling one that already fired or was cancelled is a no-op.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let Some(index) = self.timers.iter().position(|timer| timer.id == id) else {
            return false;
        };
        self.timers.remove(index);
        self.stats.total_cancelled += 1;
        self.stats.currently_scheduled = self.timers.len() as u32;
        true
    }

    /// Cancel every timer whose payload matches
    pub fn cancel_where<P>(&mut self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        let initial_count = self.timers.len();
        self.timers.retain(|timer| !predicate(&timer.payload));

        let cancelled = initial_count - self.timers.len();
        self.stats.total_cancelled += cancelled as u32;
        self.stats.currently_scheduled = self.timers.len() as u32;
        cancelled
    }

    /// Remove and return every timer due at `current_time`, earliest first
    pub fn take_due(&mut self, current_time: u64) -> Vec<ScheduledTimer<T>> {
        // Timers are sorted by deadline, so the due ones form a prefix
        let due_count = self.timers
            .iter()
            .take_while(|timer| timer.deadline <= current_time)
            .count();

        let due: Vec<_> = self.timers.drain(..due_count).collect();

        self.stats.total_fired += due.len() as u32;
        self.stats.currently_scheduled = self.timers.len() as u32;
        due
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.first().map(|timer| timer.deadline)
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.iter().any(|timer| timer.id == id)
    }

    /// Get scheduler statistics
    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Get currently scheduled timers
    pub fn get_scheduled(&self) -> &[ScheduledTimer<T>] {
        &self.timers
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Clear all scheduled timers
    pub fn clear_all(&mut self) {
        let cleared_count = self.timers.len();
        self.timers.clear();
        self.stats.total_cancelled += cleared_count as u32;
        self.stats.currently_scheduled = 0;
    }
}

impl<T> Default for TimerScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
