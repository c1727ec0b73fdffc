//! The event schedule: an ordered set of future instants.
//!
//! Each distinct date maps to an `Instant`, a bucket of `(priority, event)`
//! entries kept in descending priority order. Entries of equal priority
//! keep their insertion order (FIFO), so two runs that insert the same
//! events in the same order always resolve them in the same order.
//!
//! Events live in an arena keyed by `EventId`. Each entry records the date
//! and priority it was filed under, so `remove` can find it again with a
//! scan of one bucket and no separate index.

use crate::common::{EventId, Priority, Time};
use crate::error::{SimError, SimResult};
use ordered_float::OrderedFloat;
use slotmap::SlotMap;
use std::cmp::Reverse;
use std::collections::BTreeMap;

struct Entry<E> {
    event: E,
    date: OrderedFloat<Time>,
    priority: Priority,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    priority: Priority,
    seq: u64,
    id: EventId,
}

/// The priority-ordered bucket of events due at one date.
#[derive(Debug, Default)]
pub struct Instant {
    slots: Vec<Slot>,
}

impl Instant {
    fn file(&mut self, slot: Slot) {
        // Descending priority, FIFO among equals.
        let key = (slot.priority, Reverse(slot.seq));
        let at = self
            .slots
            .partition_point(|s| (s.priority, Reverse(s.seq)) > key);
        self.slots.insert(at, slot);
    }

    fn excise(&mut self, id: EventId) -> bool {
        match self.slots.iter().position(|s| s.id == id) {
            Some(pos) => {
                self.slots.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Priorities of the pending entries, in resolution order.
    pub fn priorities(&self) -> impl Iterator<Item = Priority> + '_ {
        self.slots.iter().map(|s| s.priority)
    }
}

/// The ordered collection of future instants.
pub struct Schedule<E> {
    dates: BTreeMap<OrderedFloat<Time>, Instant>,
    events: SlotMap<EventId, Entry<E>>,
    next_seq: u64,
}

impl<E> Schedule<E> {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self {
            dates: BTreeMap::new(),
            events: SlotMap::with_key(),
            next_seq: 0,
        }
    }

    /// Files `event` at `date` with the given tie-break `priority`.
    ///
    /// Returns the handle needed to `remove` it later.
    pub fn insert(&mut self, event: E, date: Time, priority: Priority) -> EventId {
        let date = OrderedFloat(date);
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.events.insert(Entry { event, date, priority });
        self.dates
            .entry(date)
            .or_default()
            .file(Slot { priority, seq, id });
        id
    }

    /// Excises a pending event. Drops the whole instant if it was its last entry.
    pub fn remove(&mut self, id: EventId) -> Option<E> {
        let entry = self.events.remove(id)?;
        if let Some(instant) = self.dates.get_mut(&entry.date) {
            instant.excise(id);
            if instant.is_empty() {
                self.dates.remove(&entry.date);
            }
        }
        Some(entry.event)
    }

    /// Returns the nearest date whose instant is non-empty.
    ///
    /// Exhausted instants met along the way are purged. Fails with
    /// `EmptySchedule` when nothing is pending.
    pub fn advance(&mut self) -> SimResult<Time> {
        loop {
            let (date, empty) = match self.dates.iter().next() {
                Some((date, instant)) => (*date, instant.is_empty()),
                None => return Err(SimError::EmptySchedule),
            };
            if !empty {
                return Ok(date.into_inner());
            }
            self.dates.remove(&date);
        }
    }

    /// Takes the highest-priority entry filed at `date`, if any.
    pub fn pop(&mut self, date: Time) -> Option<(Priority, E)> {
        let key = OrderedFloat(date);
        let instant = self.dates.get_mut(&key)?;
        if instant.slots.is_empty() {
            self.dates.remove(&key);
            return None;
        }
        let slot = instant.slots.remove(0);
        let entry = self.events.remove(slot.id)?;
        Some((slot.priority, entry.event))
    }

    /// Takes every entry filed at `date`, in resolution order.
    pub fn take_instant(&mut self, date: Time) -> Vec<(Priority, E)> {
        self.take_filed(date)
            .into_iter()
            .map(|(_, priority, event)| (priority, event))
            .collect()
    }

    /// Like `take_instant`, keeping the handle each entry was filed under.
    ///
    /// Entries filed at `date` afterwards open a fresh instant.
    pub fn take_filed(&mut self, date: Time) -> Vec<(EventId, Priority, E)> {
        let instant = match self.dates.remove(&OrderedFloat(date)) {
            Some(instant) => instant,
            None => return Vec::new(),
        };
        instant
            .slots
            .into_iter()
            .filter_map(|slot| {
                self.events
                    .remove(slot.id)
                    .map(|entry| (slot.id, slot.priority, entry.event))
            })
            .collect()
    }

    /// The bucket filed at `date`, if one exists.
    pub fn instant(&self, date: Time) -> Option<&Instant> {
        self.dates.get(&OrderedFloat(date))
    }

    /// The date and priority an event was filed under.
    pub fn filing(&self, id: EventId) -> Option<(Time, Priority)> {
        self.events
            .get(id)
            .map(|e| (e.date.into_inner(), e.priority))
    }

    /// Earliest date with pending events, without purging anything.
    pub fn peek_date(&self) -> Option<Time> {
        self.dates
            .iter()
            .find(|(_, instant)| !instant.is_empty())
            .map(|(date, _)| date.into_inner())
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of distinct dates with pending events.
    pub fn pending_dates(&self) -> usize {
        self.dates.values().filter(|i| !i.is_empty()).count()
    }

    /// Drops everything. Insertion sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.dates.clear();
        self.events.clear();
    }
}

impl<E> Default for Schedule<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_three_events_two_instants() {
        let mut sched = Schedule::new();
        sched.insert("e1", 5.0, 0);
        sched.insert("e2", 5.0, 1);
        sched.insert("e3", 3.0, 0);

        let t = sched.advance().unwrap();
        assert_eq!(t, 3.0);
        assert_eq!(sched.take_instant(t), vec![(0, "e3")]);

        let t = sched.advance().unwrap();
        assert_eq!(t, 5.0);
        assert_eq!(sched.take_instant(t), vec![(1, "e2"), (0, "e1")]);

        assert!(matches!(sched.advance(), Err(SimError::EmptySchedule)));
    }

    #[test]
    fn test_fifo_at_equal_priority() {
        let mut sched = Schedule::new();
        sched.insert("first", 10.0, 0);
        sched.insert("second", 10.0, 0);
        sched.insert("urgent", 10.0, 5);
        sched.insert("third", 10.0, 0);

        let got: Vec<_> = sched.take_instant(10.0).into_iter().map(|(_, e)| e).collect();
        assert_eq!(got, vec!["urgent", "first", "second", "third"]);
    }

    #[test]
    fn test_entries_filed_after_a_take_form_a_new_instant() {
        let mut sched = Schedule::new();
        let first = sched.insert("due", 2.0, 0);
        let taken = sched.take_filed(2.0);
        assert_eq!(taken, vec![(first, 0, "due")]);
        assert!(sched.is_empty());

        sched.insert("late", 2.0, 9);
        assert_eq!(sched.advance().unwrap(), 2.0);
        assert_eq!(sched.take_instant(2.0), vec![(9, "late")]);
        assert!(sched.remove(first).is_none());
    }

    #[test]
    fn test_remove_last_entry_drops_instant() {
        let mut sched = Schedule::new();
        let a = sched.insert('a', 1.0, 0);
        sched.insert('b', 2.0, 0);
        assert_eq!(sched.filing(a), Some((1.0, 0)));
        assert_eq!(sched.remove(a), Some('a'));
        assert!(sched.instant(1.0).is_none());
        assert_eq!(sched.advance().unwrap(), 2.0);
        assert_eq!(sched.remove(a), None);
    }

    #[test]
    fn test_remove_keeps_other_entries() {
        let mut sched = Schedule::new();
        let a = sched.insert('a', 1.0, 0);
        sched.insert('b', 1.0, 0);
        sched.remove(a);
        assert_eq!(sched.instant(1.0).map(Instant::len), Some(1));
        assert_eq!(sched.pop(1.0), Some((0, 'b')));
    }

    #[test]
    fn test_advance_purges_exhausted_instants() {
        let mut sched = Schedule::new();
        sched.insert(1, 1.0, 0);
        sched.insert(2, 4.0, 0);
        assert_eq!(sched.pop(1.0), Some((0, 1)));
        assert_eq!(sched.advance().unwrap(), 4.0);
        assert_eq!(sched.pending_dates(), 1);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn test_empty_schedule() {
        let mut sched: Schedule<u8> = Schedule::new();
        assert!(sched.is_empty());
        assert!(sched.peek_date().is_none());
        assert!(matches!(sched.advance(), Err(SimError::EmptySchedule)));
        assert!(sched.pop(0.0).is_none());
    }

    proptest! {
        #[test]
        fn prop_dates_ascend_and_priorities_descend(
            inserts in prop::collection::vec((0u32..50, -5i32..5), 1..200)
        ) {
            let mut sched = Schedule::new();
            for (i, (date, prio)) in inserts.iter().enumerate() {
                sched.insert(i, *date as f64, *prio);
            }
            let mut last_date = f64::NEG_INFINITY;
            let mut seen = 0;
            while let Ok(date) = sched.advance() {
                prop_assert!(date >= last_date);
                last_date = date;
                let bucket = sched.take_instant(date);
                for pair in bucket.windows(2) {
                    prop_assert!(pair[0].0 >= pair[1].0);
                    if pair[0].0 == pair[1].0 {
                        prop_assert!(pair[0].1 < pair[1].1);
                    }
                }
                seen += bucket.len();
            }
            prop_assert_eq!(seen, inserts.len());
        }
    }
}
