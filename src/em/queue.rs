use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::fragments::{Fragment, ReadHit};

/*
    items: queued items, None being an end sentinel
    closed: set once the consumers are gone; pushes are refused from then on
*/
struct QueueState<T> {
    items: VecDeque<Option<T>>,
    closed: bool,
}

/*
    Fixed-capacity blocking queue shared by any number of producers and consumers.
    A `None` pushed by a producer is the end-of-stream sentinel; consumers read until
    they pop one.

    room: signalled whenever an item leaves (push waits on it while full)
    ready: signalled whenever an item arrives (pop waits on it while empty)
*/
pub(crate) struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    room: Condvar,
    ready: Condvar,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> BoundedQueue<T> {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            state: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity), closed: false }),
            capacity,
            room: Condvar::new(),
            ready: Condvar::new(),
        }
    }

    // blocks while the queue is full; false if the queue was closed and the item dropped
    pub(crate) fn push(&self, item: Option<T>) -> bool {
        let mut state = self.state.lock();
        while state.items.len() == self.capacity && !state.closed {
            self.room.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /*
        Pops the oldest item. With `block` the call waits for one; without it an empty
        queue returns None right away, just like the end sentinel does. A closed queue
        still hands out what it holds, then reads as ended.
    */
    pub(crate) fn pop(&self, block: bool) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                // is_empty(true) waiters listen on the same condition
                self.room.notify_all();
                return item;
            }
            if !block || state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    // wakes every waiter; blocked and later pushes give up
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.room.notify_all();
        self.ready.notify_all();
    }

    // with `block`, waits until every queued item has been taken and then reports true
    pub(crate) fn is_empty(&self, block: bool) -> bool {
        let mut state = self.state.lock();
        while !state.items.is_empty() {
            if !block {
                return false;
            }
            self.room.wait(&mut state);
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

/*
    The queues connecting the stages of one pass.

    proc_in: parsed fragments waiting for the driver
    proc_on: fragments handed to the worker pool, each with the log mass it was dispatched at
    proc_out: processed fragments waiting for post-processing
    proc_invalid: alignments that are never processed but still reach the output stage
    abort: raised by the driver to make the parser stop early
*/
pub(crate) struct ParseChannels {
    pub(crate) proc_in: BoundedQueue<Fragment>,
    pub(crate) proc_on: BoundedQueue<(Fragment, f64)>,
    pub(crate) proc_out: BoundedQueue<Fragment>,
    pub(crate) proc_invalid: BoundedQueue<ReadHit>,
    abort: AtomicBool,
}

impl ParseChannels {
    pub(crate) fn new(capacity: usize) -> ParseChannels {
        ParseChannels {
            proc_in: BoundedQueue::new(capacity),
            proc_on: BoundedQueue::new(capacity),
            proc_out: BoundedQueue::new(capacity),
            proc_invalid: BoundedQueue::new(capacity),
            abort: AtomicBool::new(false),
        }
    }

    pub(crate) fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}
