//! Caller -> callee arc table.
//!
//! A hash table keyed by caller address, built on two flat arrays so that
//! recording never allocates: `callers[bucket]` holds the index of the most
//! recently used arc of that bucket, and each arc links to the next one
//! through `prev_in_bucket`. Arcs are bump-allocated from index 1; index 0 is
//! the null link.

use crate::profile::{Arc, ArcIndex, TextRange};
use crate::serialization::format::ArcRecord;

/// The arc table could not take one more arc.
#[derive(Debug, PartialEq, Eq)]
pub struct ArcTableFull {
    pub capacity: usize,
}

/// Outcome of [`CallGraph::record`].
#[derive(Debug, PartialEq, Eq)]
pub enum Recorded {
    /// A new arc was allocated.
    NewArc(ArcIndex),
    /// An existing arc was bumped.
    Bumped(ArcIndex),
    /// `from_pc` was outside the profiled text.
    OutOfRange,
}

/// Borrowed view over the caller index and arc table of a session.
pub struct CallGraph<'a> {
    pub text: TextRange,
    pub log_hash_granularity: u32,
    pub callers: &'a mut [ArcIndex],
    pub arcs: &'a mut [Arc],
    pub next_free: &'a mut ArcIndex,
}

impl CallGraph<'_> {
    /// Number of arcs the table can hold; slot 0 is reserved.
    pub fn capacity(&self) -> usize {
        self.arcs.len().saturating_sub(1)
    }

    /// Record one traversal of `from_pc -> self_pc`.
    ///
    /// Fails only when a new arc is needed and the table is full.
    pub fn record(&mut self, from_pc: usize, self_pc: usize) -> Result<Recorded, ArcTableFull> {
        let Some(offset) = self.text.offset_of(from_pc) else {
            return Ok(Recorded::OutOfRange);
        };
        let bucket = offset >> self.log_hash_granularity;
        let Some(&head) = self.callers.get(bucket) else {
            return Ok(Recorded::OutOfRange);
        };

        if head == 0 {
            let index = self.allocate(self_pc, 0)?;
            self.callers[bucket] = index;
            return Ok(Recorded::NewArc(index));
        }

        let head_arc = &mut self.arcs[head as usize];
        if head_arc.callee_pc == self_pc {
            head_arc.count = head_arc.count.saturating_add(1);
            return Ok(Recorded::Bumped(head));
        }

        let mut prev = head;
        loop {
            let current = self.arcs[prev as usize].prev_in_bucket;
            if current == 0 {
                let index = self.allocate(self_pc, head)?;
                self.callers[bucket] = index;
                return Ok(Recorded::NewArc(index));
            }

            if self.arcs[current as usize].callee_pc == self_pc {
                let arc = &mut self.arcs[current as usize];
                arc.count = arc.count.saturating_add(1);

                // Move to front
                let after = arc.prev_in_bucket;
                arc.prev_in_bucket = head;
                self.arcs[prev as usize].prev_in_bucket = after;
                self.callers[bucket] = current;
                return Ok(Recorded::Bumped(current));
            }
            prev = current;
        }
    }

    fn allocate(
        &mut self,
        self_pc: usize,
        prev_in_bucket: ArcIndex,
    ) -> Result<ArcIndex, ArcTableFull> {
        let next = *self.next_free as usize + 1;
        if next >= self.arcs.len() {
            return Err(ArcTableFull {
                capacity: self.capacity(),
            });
        }
        let index = next as ArcIndex;
        *self.next_free = index;
        self.arcs[next] = Arc {
            callee_pc: self_pc,
            count: 1,
            prev_in_bucket,
        };
        Ok(index)
    }
}

/// Caller address reported for every arc of `bucket`.
pub fn bucket_from_pc(text: &TextRange, log_hash_granularity: u32, bucket: usize) -> usize {
    text.low + (bucket << log_hash_granularity)
}

/// Iterates the arcs of one bucket, most recently used first.
pub struct Chain<'a> {
    arcs: &'a [Arc],
    next: ArcIndex,
}

impl<'a> Chain<'a> {
    pub fn new(arcs: &'a [Arc], head: ArcIndex) -> Self {
        Self { arcs, next: head }
    }
}

impl<'a> Iterator for Chain<'a> {
    type Item = (ArcIndex, &'a Arc);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        let index = self.next;
        let arc = self.arcs.get(index as usize)?;
        self.next = arc.prev_in_bucket;
        Some((index, arc))
    }
}

/// All recorded arcs in serialization order: buckets ascending, each chain
/// head first.
pub fn arc_records<'a>(
    text: &'a TextRange,
    log_hash_granularity: u32,
    callers: &'a [ArcIndex],
    arcs: &'a [Arc],
) -> impl Iterator<Item = ArcRecord> + 'a {
    callers
        .iter()
        .enumerate()
        .filter(|&(_, &head)| head != 0)
        .flat_map(move |(bucket, &head)| {
            let from_pc = bucket_from_pc(text, log_hash_granularity, bucket);
            Chain::new(arcs, head).map(move |(_, arc)| ArcRecord {
                from_pc,
                self_pc: arc.callee_pc,
                count: arc.count,
            })
        })
}
