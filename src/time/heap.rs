//! Binary min-heap of timers keyed by absolute timeout.
//!
//! Each entry caches its timeout next to the timer, and every timer caches its
//! own heap slot, so a timer can be rescheduled or removed in O(log n) without
//! searching.

use std::time::Instant;

/// Something the heap can tell where it currently lives.
pub(crate) trait HeapSlot {
    fn set_heap_slot(&self, slot: Option<usize>);
}

pub(crate) struct TimerHeap<T: HeapSlot> {
    entries: Vec<(T, Instant)>,
}

impl<T: HeapSlot> TimerHeap<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest timeout, if any timer is scheduled.
    pub(crate) fn peek_timeout(&self) -> Option<Instant> {
        self.entries.first().map(|(_, timeout)| *timeout)
    }

    pub(crate) fn peek(&self) -> Option<(&T, Instant)> {
        self.entries.first().map(|(item, timeout)| (item, *timeout))
    }

    /// Inserts an entry and returns the slot it settled in.
    pub(crate) fn push(&mut self, item: T, timeout: Instant) -> usize {
        let slot = self.entries.len();
        item.set_heap_slot(Some(slot));
        self.entries.push((item, timeout));
        self.sift_up(slot)
    }

    /// Removes the entry at `slot`, filling the hole with the last entry.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<T> {
        if slot >= self.entries.len() {
            return None;
        }

        let last = self.entries.len() - 1;
        if slot != last {
            self.swap(slot, last);
        }

        let (item, _) = self.entries.pop()?;
        item.set_heap_slot(None);

        if slot < self.entries.len() {
            self.restore(slot);
        }

        Some(item)
    }

    /// Changes the timeout of the entry at `slot` in place.
    pub(crate) fn update(&mut self, slot: usize, timeout: Instant) -> usize {
        match self.entries.get_mut(slot) {
            Some(entry) => {
                entry.1 = timeout;
                self.restore(slot)
            }
            None => slot,
        }
    }

    /// Gives the root a new, later timeout and sinks it into place.
    pub(crate) fn reschedule_root(&mut self, timeout: Instant) {
        if let Some(root) = self.entries.first_mut() {
            root.1 = timeout;
            self.sift_down(0);
        }
    }

    pub(crate) fn pop_root(&mut self) -> Option<T> {
        self.remove(0)
    }

    fn restore(&mut self, slot: usize) -> usize {
        let settled = self.sift_up(slot);
        if settled == slot {
            self.sift_down(slot)
        } else {
            settled
        }
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.entries[parent].1 <= self.entries[slot].1 {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot
    }

    fn sift_down(&mut self, mut slot: usize) -> usize {
        let len = self.entries.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;

            if left < len && self.entries[left].1 < self.entries[smallest].1 {
                smallest = left;
            }
            if right < len && self.entries[right].1 < self.entries[smallest].1 {
                smallest = right;
            }
            if smallest == slot {
                return slot;
            }

            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.entries[a].0.set_heap_slot(Some(a));
        self.entries[b].0.set_heap_slot(Some(b));
    }

    #[cfg(test)]
    fn check(&self) {
        for slot in 1..self.entries.len() {
            let parent = (slot - 1) / 2;
            assert!(self.entries[parent].1 <= self.entries[slot].1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone)]
    struct Probe {
        id: u32,
        slot: Rc<Cell<Option<usize>>>,
    }

    impl HeapSlot for Probe {
        fn set_heap_slot(&self, slot: Option<usize>) {
            self.slot.set(slot);
        }
    }

    fn probe(id: u32) -> Probe {
        Probe {
            id,
            slot: Rc::new(Cell::new(None)),
        }
    }

    fn assert_slots(heap: &TimerHeap<Probe>) {
        heap.check();
        for (index, (item, _)) in heap.entries.iter().enumerate() {
            assert_eq!(item.slot.get(), Some(index), "probe {} lost its slot", item.id);
        }
    }

    #[test]
    fn pops_in_timeout_order() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(8);
        for (id, offset) in [(0, 50), (1, 10), (2, 40), (3, 10), (4, 0), (5, 30)] {
            heap.push(probe(id), base + Duration::from_millis(offset));
            assert_slots(&heap);
        }

        let mut last = base;
        while let Some(timeout) = heap.peek_timeout() {
            assert!(timeout >= last);
            last = timeout;
            let item = heap.pop_root().unwrap();
            assert_eq!(item.slot.get(), None);
            assert_slots(&heap);
        }
        assert!(heap.is_empty());
    }

    #[test]
    fn arbitrary_removal_keeps_slots_true() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(16);
        let probes: Vec<Probe> = (0..12).map(probe).collect();
        for (index, item) in probes.iter().enumerate() {
            let offset = (index as u64 * 37) % 11;
            heap.push(item.clone(), base + Duration::from_millis(offset));
        }

        for victim in [3usize, 7, 0, 11] {
            let slot = probes[victim].slot.get().unwrap();
            let removed = heap.remove(slot).unwrap();
            assert_eq!(removed.id, victim as u32);
            assert_eq!(probes[victim].slot.get(), None);
            assert_slots(&heap);
        }
        assert_eq!(heap.len(), 8);
    }

    #[test]
    fn update_moves_both_ways() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(8);
        let probes: Vec<Probe> = (0..6).map(probe).collect();
        for (index, item) in probes.iter().enumerate() {
            heap.push(item.clone(), base + Duration::from_millis((index as u64 + 1) * 10));
        }

        let slot = probes[5].slot.get().unwrap();
        heap.update(slot, base);
        assert_slots(&heap);
        assert_eq!(heap.peek().unwrap().0.id, 5);

        heap.update(0, base + Duration::from_secs(1));
        assert_slots(&heap);
        assert_eq!(heap.peek().unwrap().0.id, 0);
    }

    #[test]
    fn rescheduled_root_sinks_below_earlier_timers() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(4);
        heap.push(probe(0), base);
        heap.push(probe(1), base + Duration::from_millis(5));
        heap.push(probe(2), base + Duration::from_millis(7));

        heap.reschedule_root(base + Duration::from_millis(6));
        assert_slots(&heap);
        assert_eq!(heap.peek().unwrap().0.id, 1);
        assert_eq!(heap.peek_timeout(), Some(base + Duration::from_millis(5)));
    }
}
