// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Concurrent task registry.

The registry maps dense task ids (1, 2, 3, ...) to queued records. Any number of producers
insert at the id they were issued; a single consumer pops records back out in ascending id
order.

# Layout

Slots live in a ring indexed by `(ordinal + offset) % capacity`, where `ordinal = id - 1`.
The ring always covers the window `[dequeue_count, dequeue_count + capacity)`. An insert
that lands beyond the window grows the table.

Each slot carries its own state byte:

* `EMPTY`: no value.
* `WRITING`: a producer is moving its value in.
* `FULL`: a value is published.
* `READING`: the consumer is moving the value out.

# Resizing

Producers and the consumer announce themselves on the `enqueue` and `dequeue` counters
before they touch the table. A resizer raises `resizing`, waits for both counters to drain
to zero, swaps the table and lowers the flag. Operations that observe the flag after
announcing themselves back out and wait. In the common case no lock is taken.
*/

use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::mem::MaybeUninit;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;
const READING: u8 = 3;

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

struct Table<T> {
    slots: Box<[Slot<T>]>,
    offset: u64,
}

impl<T> Table<T> {
    fn with_capacity(capacity: usize, offset: u64) -> Self {
        Table {
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
            offset,
        }
    }
    fn capacity(&self) -> usize {
        self.slots.len()
    }
    fn slot(&self, ordinal: u64) -> &Slot<T> {
        let index = (ordinal + self.offset) % self.slots.len() as u64;
        &self.slots[index as usize]
    }
}

pub struct TaskRegistry<T> {
    table: UnsafeCell<Table<T>>,
    capacity: AtomicUsize,
    size: AtomicUsize,
    dequeue_count: AtomicU64,
    enqueue: AtomicUsize,
    dequeue: AtomicUsize,
    resizing: AtomicBool,
}

//Values move between threads, but are never shared.
unsafe impl<T: Send> Send for TaskRegistry<T> {}
unsafe impl<T: Send> Sync for TaskRegistry<T> {}

impl<T> Debug for TaskRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("dequeue_count", &self.dequeue_count())
            .finish()
    }
}

impl<T> TaskRegistry<T> {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        TaskRegistry {
            table: UnsafeCell::new(Table::with_capacity(capacity, 0)),
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
            dequeue_count: AtomicU64::new(0),
            enqueue: AtomicUsize::new(0),
            dequeue: AtomicUsize::new(0),
            resizing: AtomicBool::new(false),
        }
    }

    /// Number of slots in the current table.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Number of records inserted but not yet popped.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records popped so far. The next pop returns id `dequeue_count() + 1`.
    pub fn dequeue_count(&self) -> u64 {
        self.dequeue_count.load(Ordering::SeqCst)
    }

    fn enter(&self, counter: &AtomicUsize) {
        loop {
            counter.fetch_add(1, Ordering::SeqCst);
            if !self.resizing.load(Ordering::SeqCst) {
                return;
            }
            counter.fetch_sub(1, Ordering::SeqCst);
            while self.resizing.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
        }
    }

    fn leave(&self, counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::SeqCst);
    }

    /**
    Publishes `value` under `id`.

    # Panics
    If `id` was already inserted, or was already popped.
    */
    pub fn insert(&self, id: NonZeroU64, value: T) {
        let ordinal = id.get() - 1;
        loop {
            self.enter(&self.enqueue);
            //safe because the table is only replaced while no operation is inside
            let table = unsafe { &*self.table.get() };
            let dequeued = self.dequeue_count.load(Ordering::SeqCst);
            if ordinal < dequeued {
                self.leave(&self.enqueue);
                panic!("task {id} inserted after it was dequeued");
            }
            let needed = (ordinal - dequeued + 1) as usize;
            let capacity = table.capacity();
            if needed > capacity {
                self.leave(&self.enqueue);
                self.resize((capacity + capacity / 2).max(capacity + 1).max(needed));
                continue;
            }
            self.size.fetch_add(1, Ordering::SeqCst);
            let slot = table.slot(ordinal);
            if slot
                .state
                .compare_exchange(EMPTY, WRITING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                self.size.fetch_sub(1, Ordering::SeqCst);
                self.leave(&self.enqueue);
                panic!("task {id} inserted twice");
            }
            unsafe {
                (*slot.value.get()).write(value);
            }
            slot.state.store(FULL, Ordering::SeqCst);
            self.leave(&self.enqueue);
            return;
        }
    }

    /**
    Removes the record with the next id in order.

    Returns `None` when the registry is empty, and also when the next id has been issued but
    its producer has not finished inserting it. Records behind an unpublished id stay queued
    until it arrives.

    There must be only one consumer.
    */
    pub fn pop(&self) -> Option<(NonZeroU64, T)> {
        self.enter(&self.dequeue);
        let result = self.pop_inside();
        self.leave(&self.dequeue);
        result
    }

    fn pop_inside(&self) -> Option<(NonZeroU64, T)> {
        if self.size.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let table = unsafe { &*self.table.get() };
        let ordinal = self.dequeue_count.load(Ordering::SeqCst);
        let slot = table.slot(ordinal);
        if slot
            .state
            .compare_exchange(FULL, READING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        //the slot must be free before the window moves past it
        slot.state.store(EMPTY, Ordering::SeqCst);
        let _ = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| s.checked_sub(1));
        self.dequeue_count.store(ordinal + 1, Ordering::SeqCst);
        Some((NonZeroU64::MIN.saturating_add(ordinal), value))
    }

    /// Grows the table to at least `new_capacity` slots.
    ///
    /// If another thread is already resizing, waits for it and returns.
    fn resize(&self, new_capacity: usize) {
        if self
            .resizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            while self.resizing.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            return;
        }
        while self.enqueue.load(Ordering::SeqCst) != 0 || self.dequeue.load(Ordering::SeqCst) != 0
        {
            std::hint::spin_loop();
        }
        //safe because every other operation is parked outside the table
        let table = unsafe { &mut *self.table.get() };
        let old_capacity = table.capacity();
        if new_capacity > old_capacity {
            let dequeued = self.dequeue_count.load(Ordering::SeqCst);
            let new_len = new_capacity as u64;
            let mut grown = Table::with_capacity(new_capacity, (new_len - dequeued % new_len) % new_len);
            for ordinal in dequeued..dequeued + old_capacity as u64 {
                let old = table.slot(ordinal);
                if old.state.load(Ordering::SeqCst) == FULL {
                    let new = grown.slot(ordinal);
                    unsafe {
                        (*new.value.get()).write((*old.value.get()).assume_init_read());
                    }
                    new.state.store(FULL, Ordering::SeqCst);
                    old.state.store(EMPTY, Ordering::SeqCst);
                }
            }
            std::mem::swap(table, &mut grown);
            self.capacity.store(new_capacity, Ordering::SeqCst);
            let from = old_capacity as u64;
            let to = new_capacity as u64;
            logwise::debuginternal_sync!(
                "task registry resized from {from} to {to} slots",
                from = from,
                to = to
            );
        }
        self.resizing.store(false, Ordering::SeqCst);
    }
}

impl<T> Drop for TaskRegistry<T> {
    fn drop(&mut self) {
        for slot in self.table.get_mut().slots.iter_mut() {
            if *slot.state.get_mut() == FULL {
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    fn id(v: u64) -> NonZeroU64 {
        NonZeroU64::new(v).unwrap()
    }

    #[test]
    fn pops_in_id_order() {
        let registry = TaskRegistry::new(4);
        registry.insert(id(2), "b");
        registry.insert(id(1), "a");
        registry.insert(id(3), "c");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.pop(), Some((id(1), "a")));
        assert_eq!(registry.pop(), Some((id(2), "b")));
        assert_eq!(registry.pop(), Some((id(3), "c")));
        assert_eq!(registry.pop(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn waits_for_unpublished_head() {
        let registry = TaskRegistry::new(4);
        registry.insert(id(2), 2);
        assert_eq!(registry.pop(), None);
        registry.insert(id(1), 1);
        assert_eq!(registry.pop(), Some((id(1), 1)));
        assert_eq!(registry.pop(), Some((id(2), 2)));
    }

    #[test]
    fn grows_past_window() {
        let registry = TaskRegistry::new(2);
        for i in 1..=7 {
            registry.insert(id(i), i);
        }
        assert!(registry.capacity() >= 7);
        for i in 1..=7 {
            assert_eq!(registry.pop(), Some((id(i), i)));
        }
    }

    #[test]
    fn grows_after_wrapping() {
        //dequeue_count not a multiple of the new capacity
        let registry = TaskRegistry::new(3);
        for i in 1..=3 {
            registry.insert(id(i), i);
        }
        assert_eq!(registry.pop(), Some((id(1), 1)));
        assert_eq!(registry.pop(), Some((id(2), 2)));
        for i in 4..=9 {
            registry.insert(id(i), i);
        }
        for i in 3..=9 {
            assert_eq!(registry.pop(), Some((id(i), i)));
        }
        assert_eq!(registry.pop(), None);
    }

    #[test]
    fn far_ahead_insert_grows_enough() {
        let registry = TaskRegistry::new(2);
        registry.insert(id(40), 40);
        assert!(registry.capacity() >= 40);
        assert_eq!(registry.pop(), None);
    }

    #[test]
    #[should_panic(expected = "inserted twice")]
    fn duplicate_insert_panics() {
        let registry = TaskRegistry::new(4);
        registry.insert(id(1), ());
        registry.insert(id(1), ());
    }

    #[test]
    fn drops_unpopped_values() {
        let counter = Arc::new(());
        {
            let registry = TaskRegistry::new(2);
            for i in 1..=5 {
                registry.insert(id(i), counter.clone());
            }
            drop(registry.pop());
            assert_eq!(Arc::strong_count(&counter), 5);
        }
        assert_eq!(Arc::strong_count(&counter), 1);
    }

    #[test]
    fn concurrent_inserts_survive_resizes() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 500;
        const TOTAL: u64 = PRODUCERS * PER_PRODUCER;
        let registry = Arc::new(TaskRegistry::new(16));
        let next_id = Arc::new(AtomicU64::new(1));

        let consumer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::with_capacity(TOTAL as usize);
                while (seen.len() as u64) < TOTAL {
                    match registry.pop() {
                        Some((task, value)) => {
                            assert_eq!(task.get(), value);
                            seen.push(value);
                        }
                        None => std::thread::yield_now(),
                    }
                }
                seen
            })
        };
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let registry = registry.clone();
                let next_id = next_id.clone();
                std::thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        let task = next_id.fetch_add(1, Ordering::SeqCst);
                        registry.insert(id(task), task);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let seen = consumer.join().unwrap();
        let expected: Vec<u64> = (1..=TOTAL).collect();
        assert_eq!(seen, expected);
        assert!(registry.is_empty());
    }
}
