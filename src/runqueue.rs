//! Runqueue set and wait set (§3, §4.3): per-output ordered ready queues
//! plus a disjoint set of blocked/unscheduled inputs keyed by wake
//! criterion.

use crate::ids::{InputHandle, Timestamp};
use std::collections::BTreeSet;

/// Ordering key: `(negative priority bucket, last timestamp, stable input
/// ordinal)`. Stored as a plain tuple so `BTreeSet`'s lexicographic `Ord`
/// gives us "higher priority first, then earlier timestamp, then stable
/// tie-break" for free -- O(log n) insert/remove/peek (§4.3).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct RunKey {
    neg_priority: i32,
    timestamp_key: u64,
    tiebreak: u32,
}

impl RunKey {
    pub fn new(priority: i32, timestamp_key: u64, handle: InputHandle) -> Self {
        RunKey {
            neg_priority: -priority,
            timestamp_key,
            tiebreak: handle.0,
        }
    }

    /// The timestamp this entry was ordered by, for cross-output
    /// `DEPENDENCY_TIMESTAMPS` comparison (§5). Zero when dependency
    /// timestamps are off (`policy::run_key` never sets it in that case).
    pub fn timestamp_key(&self) -> u64 {
        self.timestamp_key
    }
}

#[derive(Default)]
pub struct Runqueue {
    entries: BTreeSet<(RunKey, InputHandle)>,
}

impl Runqueue {
    pub fn new() -> Self {
        Runqueue::default()
    }

    pub fn push(&mut self, key: RunKey, handle: InputHandle) {
        self.entries.insert((key, handle));
    }

    pub fn pop_front(&mut self) -> Option<InputHandle> {
        let entry = *self.entries.iter().next()?;
        self.entries.remove(&entry);
        Some(entry.1)
    }

    pub fn peek_front(&self) -> Option<InputHandle> {
        self.entries.iter().next().map(|(_, h)| *h)
    }

    /// Like `peek_front`, but also returns the ordering key, for comparing
    /// this output's head against another output's without popping either.
    pub fn peek_front_entry(&self) -> Option<(RunKey, InputHandle)> {
        self.entries.iter().next().copied()
    }

    pub fn remove(&mut self, key: RunKey, handle: InputHandle) -> bool {
        self.entries.remove(&(key, handle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InputHandle> + '_ {
        self.entries.iter().map(|(_, h)| *h)
    }

    /// Remove and return an arbitrary entry whose handle satisfies `pred`,
    /// in stable (key) order -- used by the stealer (§4.8).
    pub fn take_first_matching(&mut self, mut pred: impl FnMut(InputHandle) -> bool) -> Option<InputHandle> {
        let found = self.entries.iter().find(|(_, h)| pred(*h)).copied();
        if let Some(entry) = found {
            self.entries.remove(&entry);
            Some(entry.1)
        } else {
            None
        }
    }
}

pub struct RunqueueSet {
    pub queues: Vec<Runqueue>,
}

impl RunqueueSet {
    pub fn new(num_outputs: usize) -> Self {
        RunqueueSet {
            queues: (0..num_outputs).map(|_| Runqueue::new()).collect(),
        }
    }

    pub fn total_runnable(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WaitEntry {
    pub handle: InputHandle,
    /// `None` means an infinite (non-timed) unschedule.
    pub wake_time: Option<Timestamp>,
}

#[derive(Default)]
pub struct WaitSet {
    entries: Vec<WaitEntry>,
}

impl WaitSet {
    pub fn new() -> Self {
        WaitSet::default()
    }

    pub fn push(&mut self, entry: WaitEntry) {
        self.entries.retain(|e| e.handle != entry.handle);
        self.entries.push(entry);
    }

    pub fn remove(&mut self, handle: InputHandle) -> Option<WaitEntry> {
        let pos = self.entries.iter().position(|e| e.handle == handle)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, handle: InputHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    /// Entries whose wake time has arrived, removed from the set.
    pub fn drain_ready(&mut self, now: Timestamp) -> Vec<InputHandle> {
        let mut ready = Vec::new();
        self.entries.retain(|e| match e.wake_time {
            Some(t) if t <= now => {
                ready.push(e.handle);
                false
            }
            _ => true,
        });
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The entry with the nearest finite wake time, or, if every entry is
    /// infinite, the stable-first one -- used by the forced-wake fallback
    /// (§4.4) when `honor_infinite_timeouts` is false.
    pub fn nearest_wake(&self) -> Option<InputHandle> {
        if self.entries.is_empty() {
            return None;
        }
        let finite = self
            .entries
            .iter()
            .filter(|e| e.wake_time.is_some())
            .min_by_key(|e| e.wake_time.unwrap());
        if let Some(e) = finite {
            return Some(e.handle);
        }
        self.entries.iter().min_by_key(|e| e.handle.0).map(|e| e.handle)
    }
}

pub fn rebalance_target(runnable: usize, outputs: usize) -> usize {
    if outputs == 0 {
        0
    } else {
        (runnable + outputs - 1) / outputs
    }
}
