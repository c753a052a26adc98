// Bounded dual-ring entry buffer

use crate::model::{LogEntry, LogLevel};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_MAIN_CAPACITY: usize = 1000;
pub const DEFAULT_PRIORITY_CAPACITY: usize = 100;

/// Floor the memory-pressure path never shrinks below.
pub const MIN_MAIN_CAPACITY: usize = 50;

/// Two bounded rings behind one mutex: a main ring for everything and a
/// smaller priority ring that shadows error/fatal entries so they survive
/// overflow of the main ring.
///
/// Appends never fail; the oldest entries are evicted to make room. The
/// mutex is held only across append/drain/reduce, never across I/O.
pub struct RingBuffer {
    inner: Mutex<Rings>,
}

struct Rings {
    main: VecDeque<LogEntry>,
    priority: VecDeque<LogEntry>,
    max_main: usize,
    max_priority: usize,
}

impl Rings {
    fn push_bounded(ring: &mut VecDeque<LogEntry>, cap: usize, entry: LogEntry) {
        if cap == 0 {
            return;
        }
        while ring.len() >= cap {
            ring.pop_front();
        }
        ring.push_back(entry);
    }
}

impl RingBuffer {
    pub fn new(max_main: usize, max_priority: usize) -> Self {
        RingBuffer {
            inner: Mutex::new(Rings {
                main: VecDeque::with_capacity(max_main.min(4096)),
                priority: VecDeque::with_capacity(max_priority.min(1024)),
                max_main,
                max_priority,
            }),
        }
    }

    /// Replace both rings, dropping anything buffered. Used when `start`
    /// reconfigures the capacity.
    pub fn reset(&self, max_main: usize, max_priority: usize) {
        let mut rings = self.inner.lock();
        rings.main = VecDeque::with_capacity(max_main.min(4096));
        rings.priority = VecDeque::with_capacity(max_priority.min(1024));
        rings.max_main = max_main;
        rings.max_priority = max_priority;
    }

    pub fn append(&self, entry: LogEntry) {
        let mut rings = self.inner.lock();
        if matches!(entry.level, LogLevel::Error | LogLevel::Fatal) {
            let cap = rings.max_priority;
            let clone = entry.clone();
            Rings::push_bounded(&mut rings.priority, cap, clone);
        }
        let cap = rings.max_main;
        Rings::push_bounded(&mut rings.main, cap, entry);
    }

    /// Merge both rings into one batch: dedup by id keeping the first
    /// occurrence, stable-sort ascending by timestamp, clear both rings.
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut rings = self.inner.lock();
        let mut seen: HashSet<String> = HashSet::with_capacity(rings.main.len());
        let mut batch: Vec<LogEntry> =
            Vec::with_capacity(rings.main.len() + rings.priority.len());

        let main_drained = rings.main.drain(..).collect::<Vec<_>>();
        let priority_drained = rings.priority.drain(..).collect::<Vec<_>>();
        for entry in main_drained.into_iter().chain(priority_drained.into_iter()) {
            if seen.insert(entry.id.clone()) {
                batch.push(entry);
            }
        }

        // sort_by_key is stable, so same-timestamp entries keep their
        // insertion order.
        batch.sort_by_key(|e| e.timestamp);
        batch
    }

    /// Lower the main capacity and trim the oldest excess. Raising the
    /// capacity back up is also allowed; nothing is trimmed then.
    pub fn reduce_max_size(&self, new_cap: usize) {
        let mut rings = self.inner.lock();
        rings.max_main = new_cap.max(1);
        while rings.main.len() > rings.max_main {
            rings.main.pop_front();
        }
    }

    pub fn max_main(&self) -> usize {
        self.inner.lock().max_main
    }

    pub fn len(&self) -> usize {
        let rings = self.inner.lock();
        rings.main.len() + rings.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory footprint at a fixed per-entry cost.
    pub fn estimated_bytes(&self) -> usize {
        self.len() * LogEntry::ESTIMATED_BYTES
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        RingBuffer::new(DEFAULT_MAIN_CAPACITY, DEFAULT_PRIORITY_CAPACITY)
    }
}
