//! In-process message passing: every rank is a thread of the same process.
//!
//! Messages are buffered in a shared mailbox keyed by `(source, destination, tag)`, so sends
//! never block and receives match MPI's non-overtaking rule. Used by the test-suite and by
//! serial runs (`LocalComm::serial()`).

use super::{Comm, Tag};
use crate::error::BddcError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier};
use std::time::Duration;

type Slot = (usize, usize, Tag);

struct Mailbox {
    slots: Mutex<HashMap<Slot, VecDeque<Vec<u8>>>>,
    arrived: Condvar,
    barrier: Barrier,
}

impl Mailbox {
    fn new(size: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
            barrier: Barrier::new(size),
        }
    }
}

/// A rank of an in-process world.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LocalComm {
    /// Default time a receive waits before reporting a deadlock.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create the `size` ranks of a new world.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new(size.max(1)));
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout: Self::DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// A world with a single rank.
    pub fn serial() -> Self {
        LocalComm {
            rank: 0,
            size: 1,
            mailbox: Arc::new(Mailbox::new(1)),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `f` on every rank of a new world, one scoped thread per rank, and return the
    /// results in rank order. A panic on any rank is propagated.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(size);
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.mailbox.barrier.wait();
    }

    fn send_bytes(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<(), BddcError> {
        if dest >= self.size {
            return Err(BddcError::Comm(format!(
                "rank {} cannot send to rank {dest} of {}",
                self.rank, self.size
            )));
        }
        self.mailbox
            .slots
            .lock()
            .entry((self.rank, dest, tag))
            .or_default()
            .push_back(data);
        self.mailbox.arrived.notify_all();
        Ok(())
    }

    fn recv_bytes(&self, src: usize, tag: Tag) -> Result<Vec<u8>, BddcError> {
        if src >= self.size {
            return Err(BddcError::Comm(format!(
                "rank {} cannot receive from rank {src} of {}",
                self.rank, self.size
            )));
        }
        let slot = (src, self.rank, tag);
        let mut slots = self.mailbox.slots.lock();
        loop {
            if let Some(msg) = slots.get_mut(&slot).and_then(VecDeque::pop_front) {
                return Ok(msg);
            }
            if self.mailbox.arrived.wait_for(&mut slots, self.timeout).timed_out() {
                if let Some(msg) = slots.get_mut(&slot).and_then(VecDeque::pop_front) {
                    return Ok(msg);
                }
                return Err(BddcError::Comm(format!(
                    "rank {} timed out waiting for tag {tag} from rank {src}",
                    self.rank
                )));
            }
        }
    }
}
