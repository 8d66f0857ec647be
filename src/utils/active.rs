//! O(1) removal from arrays that may be mid-iteration.
//!
//! The I/O watcher set and the process function set are plain arrays walked by
//! a cursor during dispatch. A handler may disable any entry, including one the
//! cursor already passed, so removal has to keep two promises: no entry that
//! has not been visited yet is skipped, and no entry already visited is
//! visited again.

/// Array-like storage whose entries remember their own index.
pub(crate) trait Slots {
    type Item;

    fn slot_count(&self) -> usize;

    /// Exchanges two slots and records the new positions of both entries.
    fn swap_slots(&mut self, a: usize, b: usize);

    /// Removes the last slot and clears its position marker.
    fn pop_slot(&mut self) -> Option<Self::Item>;
}

/// Removes the entry at `position` in O(1).
///
/// `next` is the iteration cursor, when a walk is in progress: the index of
/// the next slot to visit, so the entry being dispatched sits at `next - 1`.
///
/// Outside iteration, or when the victim lies beyond the entry being
/// dispatched, the victim is swapped with the last entry and popped. When the
/// victim lies at or before the dispatched entry, the dispatched entry moves
/// into the victim's slot, the true last entry moves into the dispatched slot,
/// and the cursor steps back so that entry is visited next.
pub(crate) fn remove_at<S: Slots>(
    slots: &mut S,
    position: usize,
    next: &mut Option<usize>,
) -> Option<S::Item> {
    let count = slots.slot_count();
    if position >= count {
        return None;
    }
    let last = count - 1;

    match next {
        Some(cursor) if position < *cursor => {
            let current = *cursor - 1;
            if position != current {
                slots.swap_slots(current, position);
            }
            if last != current {
                slots.swap_slots(last, current);
            }
            *cursor -= 1;
        }
        _ => {
            if position != last {
                slots.swap_slots(last, position);
            }
        }
    }

    slots.pop_slot()
}
