//! The dispatch queue: priority-preemption-free (spec §4.5) — a
//! higher-priority job jumps the queue for new assignments but never
//! cancels in-flight chunks. Starvation is prevented by aging: after
//! `age_interval` spent in queue, an entry's effective priority increments.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: [u8; 16],
    pub chunk_index: u32,
    pub attempt_number: u32,
    pub base_priority: u8,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone)]
struct HeapItem {
    entry: QueueEntry,
    effective_priority: u8,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.effective_priority == other.effective_priority
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_priority
            .cmp(&other.effective_priority)
            .then_with(|| other.entry.enqueued_at.cmp(&self.entry.enqueued_at))
    }
}

pub struct DispatchQueue {
    heap: BinaryHeap<HeapItem>,
    age_interval: Duration,
}

impl DispatchQueue {
    pub fn new(age_interval: Duration) -> Self {
        Self { heap: BinaryHeap::new(), age_interval }
    }

    pub fn push(&mut self, entry: QueueEntry) {
        let effective_priority = entry.base_priority;
        self.heap.push(HeapItem { entry, effective_priority });
    }

    /// Pops the highest effective-priority entry, recomputing aging bumps
    /// for every queued entry first so a long-waiting low-priority chunk
    /// can outrank a freshly-enqueued high-priority one.
    pub fn pop(&mut self, now: Instant) -> Option<QueueEntry> {
        if self.heap.is_empty() {
            return None;
        }
        let mut items: Vec<HeapItem> = std::mem::take(&mut self.heap).into_vec();
        for item in items.iter_mut() {
            let waited = now.saturating_duration_since(item.entry.enqueued_at);
            let bumps = (waited.as_secs_f64() / self.age_interval.as_secs_f64().max(0.001)).floor() as u32;
            item.effective_priority = item.entry.base_priority.saturating_add(bumps.min(255) as u8);
        }
        items.sort();
        let top = items.pop();
        self.heap = items.into_iter().collect();
        top.map(|i| i.entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: u8) -> QueueEntry {
        QueueEntry {
            job_id: [0u8; 16],
            chunk_index: 0,
            attempt_number: 0,
            base_priority: priority,
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let mut q = DispatchQueue::new(Duration::from_secs(3600));
        q.push(entry(1));
        q.push(entry(9));
        q.push(entry(5));
        let first = q.pop(Instant::now()).unwrap();
        assert_eq!(first.base_priority, 9);
    }

    #[test]
    fn aging_eventually_promotes_a_low_priority_entry() {
        let mut q = DispatchQueue::new(Duration::from_millis(1));
        let old_entry = QueueEntry {
            enqueued_at: Instant::now() - Duration::from_millis(100),
            ..entry(1)
        };
        q.push(old_entry);
        q.push(entry(9));

        // enough aging intervals have elapsed that the old low-priority
        // entry's effective priority now exceeds the fresh high-priority one
        let popped = q.pop(Instant::now());
        assert_eq!(popped.unwrap().base_priority, 1);
    }
}
