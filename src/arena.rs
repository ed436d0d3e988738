// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Circular staging arena.

The arena is a fixed-size ring of CPU-writable bytes. Producers reserve a byte span, copy
their payload into it, and hand the arena offsets to the copy worker. A span that would run
past the end of the ring is split into a tail range (up to the end) and a head range
(starting again at offset 0).

Space accounting and placement are separate steps:

1.  `remaining` is decremented with a compare-and-swap loop. If the request does not fit,
    the reservation fails without touching the ring.
2.  The head is advanced under a short mutex, which also issues the reservation's sequence
    number. Sequence numbers are therefore ordered exactly like ring placement.

Because the outstanding charge never exceeds the capacity and bytes are released in
placement order, live spans never overlap and writers do not need a lock to fill them.
*/

use crate::bittricks::align_up;
use crate::error::ArenaError;
use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU64;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// A contiguous piece of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaRange {
    /// Offset of the first byte within the ring.
    pub arena_offset: u64,
    /// Offset of the first byte within the reserved payload.
    pub payload_offset: u64,
    pub len: u64,
}

impl ArenaRange {
    pub fn arena_end(&self) -> u64 {
        self.arena_offset + self.len
    }
}

/// Where a reservation landed in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaSpan {
    Contiguous([ArenaRange; 1]),
    /// `[tail, head]`: the tail runs to the end of the ring, the head restarts at 0.
    Split([ArenaRange; 2]),
}

impl ArenaSpan {
    pub fn ranges(&self) -> &[ArenaRange] {
        match self {
            ArenaSpan::Contiguous(r) => r,
            ArenaSpan::Split(r) => r,
        }
    }
    pub fn is_split(&self) -> bool {
        matches!(self, ArenaSpan::Split(_))
    }
}

/// A span of the arena owned by one producer.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "A reservation's charge must eventually be released or it is leaked"]
pub struct Reservation {
    arena_id: u64,
    sequence: NonZeroU64,
    span: ArenaSpan,
    len: u64,
    charge: u64,
}

impl Reservation {
    /// Position of this reservation in the arena's placement order, starting at 1.
    pub fn sequence(&self) -> NonZeroU64 {
        self.sequence
    }
    pub fn span(&self) -> &ArenaSpan {
        &self.span
    }
    pub fn ranges(&self) -> &[ArenaRange] {
        self.span.ranges()
    }
    /// Requested payload length.
    pub fn len(&self) -> u64 {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// Bytes removed from the arena's headroom, including granularity padding.
    pub fn charge(&self) -> u64 {
        self.charge
    }

    /// Maps an offset within the payload to its offset within the ring.
    pub fn arena_offset_of(&self, payload_offset: u64) -> u64 {
        let range = self
            .ranges()
            .iter()
            .find(|r| payload_offset >= r.payload_offset && payload_offset < r.payload_offset + r.len)
            .unwrap_or_else(|| {
                panic!(
                    "payload offset {payload_offset} outside reservation of {} bytes",
                    self.len
                )
            });
        range.arena_offset + (payload_offset - range.payload_offset)
    }

    /// Maps an offset within the ring back to its offset within the payload.
    pub fn payload_offset_of(&self, arena_offset: u64) -> u64 {
        let range = self
            .ranges()
            .iter()
            .find(|r| arena_offset >= r.arena_offset && arena_offset < r.arena_end())
            .unwrap_or_else(|| panic!("arena offset {arena_offset} outside reservation"));
        range.payload_offset + (arena_offset - range.arena_offset)
    }
}

struct Cursor {
    head: u64,
}

pub struct StagingArena {
    memory: Box<[UnsafeCell<u8>]>,
    granularity: u64,
    remaining: AtomicU64,
    cursor: Mutex<Cursor>,
    issued: AtomicU64,
    id: u64,
}

//Writers only touch the spans they reserved, and spans never overlap.
unsafe impl Sync for StagingArena {}

impl Debug for StagingArena {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArena")
            .field("capacity", &self.capacity())
            .field("granularity", &self.granularity)
            .field("remaining", &self.remaining())
            .field("issued", &self.issued())
            .finish()
    }
}

fn zeroed_memory(capacity: u64) -> Box<[UnsafeCell<u8>]> {
    let bytes = vec![0u8; capacity as usize].into_boxed_slice();
    //safe because UnsafeCell<u8> has the same layout as u8
    unsafe { Box::from_raw(Box::into_raw(bytes) as *mut [UnsafeCell<u8>]) }
}

impl StagingArena {
    /**
    Creates an arena of `capacity` bytes.

    Every reservation is rounded up to `granularity`, which must be a power of two, so the
    head always sits on a granularity boundary. `capacity` is rounded up likewise.
    */
    pub fn new(capacity: u64, granularity: u64) -> Result<Self, ArenaError> {
        assert!(
            granularity.is_power_of_two(),
            "arena granularity must be a power of two"
        );
        let capacity = align_up(capacity, granularity);
        if capacity == 0 {
            return Err(ArenaError::ZeroCapacity { granularity });
        }
        Ok(StagingArena {
            memory: zeroed_memory(capacity),
            granularity,
            remaining: AtomicU64::new(capacity),
            cursor: Mutex::new(Cursor { head: 0 }),
            issued: AtomicU64::new(0),
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.memory.len() as u64
    }
    pub fn granularity(&self) -> u64 {
        self.granularity
    }
    /// Bytes currently available for reservation.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }
    /// Number of reservations ever made, which is also the latest sequence number.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    /// Reserves `len` bytes, splitting at the end of the ring if necessary.
    pub fn reserve(&self, len: u64) -> Result<Reservation, ArenaError> {
        let charge = align_up(len, self.granularity);
        let mut available = self.remaining.load(Ordering::Acquire);
        loop {
            if charge > available {
                return Err(ArenaError::CapacityExceeded {
                    requested: charge,
                    available,
                });
            }
            match self.remaining.compare_exchange_weak(
                available,
                available - charge,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => available = actual,
            }
        }

        let capacity = self.capacity();
        let mut cursor = self.cursor.lock().unwrap();
        let start = cursor.head;
        cursor.head = (start + charge) % capacity;
        let previous = self.issued.fetch_add(1, Ordering::AcqRel);
        drop(cursor);

        let span = if start + len <= capacity {
            ArenaSpan::Contiguous([ArenaRange {
                arena_offset: start,
                payload_offset: 0,
                len,
            }])
        } else {
            let tail_len = capacity - start;
            ArenaSpan::Split([
                ArenaRange {
                    arena_offset: start,
                    payload_offset: 0,
                    len: tail_len,
                },
                ArenaRange {
                    arena_offset: 0,
                    payload_offset: tail_len,
                    len: len - tail_len,
                },
            ])
        };
        Ok(Reservation {
            arena_id: self.id,
            sequence: NonZeroU64::MIN.saturating_add(previous),
            span,
            len,
            charge,
        })
    }

    /// Returns a reservation's charge to the headroom.
    ///
    /// Charges must be released in sequence order, since the ring only frees from its tail.
    pub fn release(&self, charge: u64) {
        let before = self.remaining.fetch_add(charge, Ordering::AcqRel);
        debug_assert!(
            before + charge <= self.capacity(),
            "released more than was reserved"
        );
    }

    /**
    Copies `bytes` into the reservation starting at `payload_offset`, following the wrap.

    # Panics
    If the reservation came from another arena (or from before a [`Self::grow`]), or if
    the write runs past the reservation.
    */
    pub fn write(&self, reservation: &Reservation, payload_offset: u64, bytes: &[u8]) {
        assert_eq!(
            reservation.arena_id, self.id,
            "reservation does not belong to this arena"
        );
        let write_end = payload_offset + bytes.len() as u64;
        assert!(
            write_end <= reservation.len,
            "write of {} bytes at {payload_offset} overruns a {} byte reservation",
            bytes.len(),
            reservation.len
        );
        for range in reservation.ranges() {
            let lo = payload_offset.max(range.payload_offset);
            let hi = write_end.min(range.payload_offset + range.len);
            if lo >= hi {
                continue;
            }
            let src = &bytes[(lo - payload_offset) as usize..(hi - payload_offset) as usize];
            let dst = range.arena_offset + (lo - range.payload_offset);
            //safe because the reservation is unique and no other span overlaps it
            unsafe {
                let ptr = UnsafeCell::raw_get(self.memory.as_ptr().add(dst as usize));
                std::ptr::copy_nonoverlapping(src.as_ptr(), ptr, src.len());
            }
        }
    }

    /**
    Borrows `len` bytes of the ring starting at `arena_offset`.

    # Safety
    The range must lie inside a single range of a reservation whose writes have completed,
    and nobody may write it while the borrow lives.
    */
    pub(crate) unsafe fn bytes(&self, arena_offset: u64, len: u64) -> &[u8] {
        assert!(arena_offset + len <= self.capacity(), "read past end of arena");
        unsafe {
            let ptr = UnsafeCell::raw_get(self.memory.as_ptr().add(arena_offset as usize));
            std::slice::from_raw_parts(ptr as *const u8, len as usize)
        }
    }

    /**
    Grows the ring to `new_capacity` bytes.

    The live window (the bytes between the oldest unreleased reservation and the head) is
    copied to the start of the new ring, preserving order. Existing reservations are
    invalidated, so this requires exclusive access.
    */
    pub fn grow(&mut self, new_capacity: u64) -> Result<(), ArenaError> {
        let new_capacity = align_up(new_capacity, self.granularity);
        let capacity = self.capacity();
        if new_capacity < capacity {
            return Err(ArenaError::CannotShrink {
                current: capacity,
                requested: new_capacity,
            });
        }
        if new_capacity == capacity {
            return Ok(());
        }
        let remaining = *self.remaining.get_mut();
        let live = capacity - remaining;
        let cursor = self.cursor.get_mut().unwrap();
        let tail = (cursor.head + capacity - live) % capacity;

        let mut memory = zeroed_memory(new_capacity);
        for i in 0..live {
            let from = ((tail + i) % capacity) as usize;
            *memory[i as usize].get_mut() = *self.memory[from].get_mut();
        }
        self.memory = memory;
        cursor.head = live % new_capacity;
        *self.remaining.get_mut() = new_capacity - live;
        self.id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        logwise::info_sync!(
            "staging arena grew from {capacity} to {new_capacity} bytes with {live} live",
            capacity = capacity,
            new_capacity = new_capacity,
            live = live
        );
        Ok(())
    }
}
