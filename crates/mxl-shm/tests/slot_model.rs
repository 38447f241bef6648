//! In-memory model of the grain slot state machine.
//!
//! Exercises the EMPTY -> OPEN -> COMMITTED -> OPEN' lifecycle and the
//! reader-facing visibility rules against a pure model, without touching real
//! shared memory. The model mirrors the slot header: an occupant index and a
//! committed byte count.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Open(u64),
    Committed(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Visibility {
    Visible,
    NotReady,
    OutOfRange,
}

struct RingModel {
    grain_count: u64,
    grain_size: u64,
    slots: Vec<SlotModel>,
}

struct SlotModel {
    occupant: u64,
    committed: u64,
    written: bool,
}

impl RingModel {
    fn new(grain_count: u64, grain_size: u64) -> Self {
        assert!(grain_count > 0);
        Self {
            grain_count,
            grain_size,
            slots: (0..grain_count)
                .map(|_| SlotModel {
                    occupant: 0,
                    committed: 0,
                    written: false,
                })
                .collect(),
        }
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.grain_count) as usize
    }

    fn state(&self, slot: usize) -> SlotState {
        let s = &self.slots[slot];
        if !s.written {
            SlotState::Empty
        } else if s.committed == self.grain_size {
            SlotState::Committed(s.occupant)
        } else {
            SlotState::Open(s.occupant)
        }
    }

    /// Writer opens the slot for `index`: committed drops to zero before the
    /// new occupant becomes observable.
    fn open(&mut self, index: u64) {
        let slot = self.slot(index);
        let s = &mut self.slots[slot];
        s.committed = 0;
        s.occupant = index;
        s.written = true;
    }

    /// Writer commits the currently open grain.
    fn commit(&mut self, index: u64) {
        let slot = self.slot(index);
        let s = &mut self.slots[slot];
        assert_eq!(s.occupant, index, "commit of a grain that is not open");
        s.committed = self.grain_size;
    }

    /// The reader-facing visibility rule for `index`.
    fn visibility(&self, index: u64) -> Visibility {
        let s = &self.slots[self.slot(index)];
        if !s.written || s.occupant < index {
            return Visibility::NotReady;
        }
        if s.occupant > index {
            return Visibility::OutOfRange;
        }
        if s.committed == self.grain_size {
            Visibility::Visible
        } else {
            Visibility::NotReady
        }
    }
}

#[test]
fn lifecycle_follows_the_state_machine() {
    let mut ring = RingModel::new(4, 64);

    assert_eq!(ring.state(0), SlotState::Empty);
    assert_eq!(ring.visibility(0), Visibility::NotReady);

    ring.open(0);
    assert_eq!(ring.state(0), SlotState::Open(0));
    assert_eq!(ring.visibility(0), Visibility::NotReady);

    ring.commit(0);
    assert_eq!(ring.state(0), SlotState::Committed(0));
    assert_eq!(ring.visibility(0), Visibility::Visible);

    // Reopening with index + grain_count recycles the slot.
    ring.open(4);
    assert_eq!(ring.state(0), SlotState::Open(4));
    assert_eq!(ring.visibility(0), Visibility::OutOfRange);
    assert_eq!(ring.visibility(4), Visibility::NotReady);

    ring.commit(4);
    assert_eq!(ring.visibility(4), Visibility::Visible);
}

#[test]
fn sequential_writer_maintains_window_invariant() {
    let grain_count = 5u64;
    let mut ring = RingModel::new(grain_count, 128);

    for head in 0..64u64 {
        ring.open(head);

        // Mid-write, the head is invisible and the previous window intact.
        assert_eq!(ring.visibility(head), Visibility::NotReady);

        ring.commit(head);
        let committed = head + 1; // sync counter after this commit

        // Invariant: every index in [max(0, N - grain_count), N - 1] is
        // readable once the counter reaches N.
        let low = committed.saturating_sub(grain_count);
        for index in low..committed {
            assert_eq!(
                ring.visibility(index),
                Visibility::Visible,
                "index {index} must be visible at counter {committed}"
            );
        }
        if low > 0 {
            assert_eq!(ring.visibility(low - 1), Visibility::OutOfRange);
        }
        assert_eq!(ring.visibility(committed), Visibility::NotReady);
    }
}

#[test]
fn skipped_indices_leave_stale_slots_not_ready() {
    let mut ring = RingModel::new(4, 32);

    ring.open(0);
    ring.commit(0);
    // Writer jumps ahead (missed ticks): 1 and 2 never happen.
    ring.open(3);
    ring.commit(3);

    assert_eq!(ring.visibility(0), Visibility::Visible);
    assert_eq!(ring.visibility(3), Visibility::Visible);
    // Slots 1 and 2 still hold nothing.
    assert_eq!(ring.visibility(1), Visibility::NotReady);
    assert_eq!(ring.visibility(2), Visibility::NotReady);
    // A full lap later, slot 3's old occupant is gone.
    ring.open(7);
    ring.commit(7);
    assert_eq!(ring.visibility(3), Visibility::OutOfRange);
}
