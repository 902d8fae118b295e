//! Trial pool and ready queue.
//!
//! The pool holds every in-flight trial; a slot is free while its point
//! id is invalid. The ready queue is a ring buffer of slot indices whose
//! capacity tracks the pool, so overflow on either is an engine bug, not
//! a load condition.

use attune_core::{Point, Trial};

use crate::error::SessionError;

/// Fixed-capacity (grown only on JOIN) array of trial slots.
pub struct TrialPool {
    slots: Vec<Trial>,
    pending: usize,
    perf_width: usize,
}

impl TrialPool {
    pub fn new(perf_width: usize) -> Self {
        Self {
            slots: Vec::new(),
            pending: 0,
            perf_width,
        }
    }

    /// Extend the pool to at least `target` slots. Never shrinks.
    pub fn grow(&mut self, target: usize) {
        while self.slots.len() < target {
            self.slots.push(Trial::empty(self.perf_width));
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn has_room(&self) -> bool {
        self.pending < self.slots.len()
    }

    /// Find the lowest-indexed free slot and reset its performance. The
    /// caller commits the slot once the strategy has stamped a point.
    pub(crate) fn reserve(&mut self) -> Result<usize, SessionError> {
        let idx = self
            .slots
            .iter()
            .position(|t| !t.point.is_valid())
            .ok_or_else(|| SessionError::Internal("point generation overflow".into()))?;
        self.slots[idx].perf.reset();
        Ok(idx)
    }

    /// Count a reserved slot as occupied.
    pub(crate) fn commit(&mut self, _idx: usize) {
        self.pending += 1;
    }

    /// Release a slot back to the free list.
    pub(crate) fn free(&mut self, idx: usize) {
        self.slots[idx].point = Point::invalid();
        self.pending -= 1;
    }

    pub fn get(&self, idx: usize) -> &Trial {
        &self.slots[idx]
    }

    pub(crate) fn trial_mut(&mut self, idx: usize) -> &mut Trial {
        &mut self.slots[idx]
    }

    pub(crate) fn point_mut(&mut self, idx: usize) -> &mut Point {
        &mut self.slots[idx].point
    }

    /// Locate the occupied slot holding the point with this id.
    pub fn find_by_id(&self, id: i32) -> Option<usize> {
        if id < 0 {
            return None;
        }
        self.slots.iter().position(|t| t.point.id == id)
    }
}

/// FIFO ring buffer of pool-slot indices awaiting client fetch.
pub struct ReadyQueue {
    cells: Vec<Option<usize>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a slot index at the tail. The target cell must be empty;
    /// a full queue here is an engine bug.
    pub(crate) fn enqueue(&mut self, slot: usize) -> Result<(), SessionError> {
        if self.cells.is_empty() || self.cells[self.tail].is_some() {
            return Err(SessionError::Internal("ready queue overflow".into()));
        }
        self.cells[self.tail] = Some(slot);
        self.tail = (self.tail + 1) % self.cells.len();
        self.len += 1;
        Ok(())
    }

    pub fn peek(&self) -> Option<usize> {
        self.cells.get(self.head).copied().flatten()
    }

    pub(crate) fn dequeue(&mut self) -> Option<usize> {
        let slot = self.cells.get_mut(self.head)?.take()?;
        self.head = (self.head + 1) % self.cells.len();
        self.len -= 1;
        Some(slot)
    }

    /// Extend the ring to at least `target` cells, preserving FIFO
    /// order. The head is first re-aligned to index 0 with three
    /// sub-array reversals (a left rotation), then the ring is widened.
    pub fn grow(&mut self, target: usize) {
        if target <= self.cells.len() {
            return;
        }
        let cap = self.cells.len();
        if self.len == 0 {
            self.head = 0;
            self.tail = 0;
        } else if self.head != 0 {
            let split = cap - self.head;
            self.cells.reverse();
            self.cells[..split].reverse();
            self.cells[split..].reverse();
            self.head = 0;
        }
        self.cells.resize(target, None);
        self.tail = self.len;
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
