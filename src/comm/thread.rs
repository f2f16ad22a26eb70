//! In-process backend: one OS thread per rank of a shared world.
//!
//! All communication state lives inside the [`ThreadComm::world`]-created
//! `WorldState` that the ranks jointly own: a single message table for
//! point-to-point traffic and a shard table for one-sided windows, plus
//! the world barrier. There are no process globals, so concurrent worlds
//! (parallel test runs) cannot observe each other, and a world's storage
//! is reclaimed when its last communicator and window are dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::window::RmaWindow;
use crate::error::DomainError;

/// `(src, dst, tag)` routes a message queue within its world.
type Route = (usize, usize, u16);

/// State jointly owned by every rank of one world.
struct WorldState {
    size: usize,
    barrier: Barrier,
    /// In-flight messages per route; senders append, receivers pop.
    messages: Mutex<HashMap<Route, VecDeque<Vec<u8>>>>,
    /// Signalled on every delivery; receivers re-check their route.
    delivered: Condvar,
    /// Published window shards, keyed by `(window sequence, rank)`.
    shards: Mutex<HashMap<(u64, usize), Arc<Vec<u8>>>>,
}

/// Sends complete at the call: the message is already queued in the world.
pub struct ThreadSendHandle;

impl Wait for ThreadSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Blocks in `wait` until a message arrives on the handle's route.
pub struct ThreadRecvHandle {
    world: Arc<WorldState>,
    route: Route,
    want_len: usize,
}

impl Wait for ThreadRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let mut messages = self.world.messages.lock().expect("world messages poisoned");
        loop {
            if let Some(mut msg) = messages
                .get_mut(&self.route)
                .and_then(VecDeque::pop_front)
            {
                msg.truncate(self.want_len.min(msg.len()));
                return Some(msg);
            }
            messages = self
                .world
                .delivered
                .wait(messages)
                .expect("world messages poisoned");
        }
    }
}

/// One rank of an in-process world.
pub struct ThreadComm {
    rank: usize,
    world: Arc<WorldState>,
    window_seq: AtomicU64,
}

impl ThreadComm {
    /// Create a world of `size` ranks, one communicator each.
    ///
    /// Each returned communicator is meant to be moved onto its own thread;
    /// all collective operations must then be entered by every rank.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "world must have at least one rank");
        let world = Arc::new(WorldState {
            size,
            barrier: Barrier::new(size),
            messages: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
            shards: Mutex::new(HashMap::new()),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                world: world.clone(),
                window_seq: AtomicU64::new(0),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSendHandle;
    type RecvHandle = ThreadRecvHandle;
    type Window = ThreadWindow;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        {
            let mut messages = self.world.messages.lock().expect("world messages poisoned");
            messages
                .entry((self.rank, peer, tag))
                .or_default()
                .push_back(buf.to_vec());
        }
        self.world.delivered.notify_all();
        ThreadSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        ThreadRecvHandle {
            world: self.world.clone(),
            route: (peer, self.rank, tag),
            want_len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn barrier(&self) {
        self.world.barrier.wait();
    }

    fn open_window(&self, shard: Vec<u8>) -> Result<Self::Window, DomainError> {
        // Ranks open windows in identical collective order, so a per-rank
        // sequence number names the same window on every rank.
        let seq = self.window_seq.fetch_add(1, Ordering::Relaxed);
        let shard = Arc::new(shard);
        self.world
            .shards
            .lock()
            .expect("world shards poisoned")
            .insert((seq, self.rank), shard.clone());
        // Publication barrier: after this, every rank's shard is visible.
        self.world.barrier.wait();
        Ok(ThreadWindow {
            world: self.world.clone(),
            seq,
            local: shard,
        })
    }
}

/// One-sided read access to the shards of one in-process window.
pub struct ThreadWindow {
    world: Arc<WorldState>,
    seq: u64,
    local: Arc<Vec<u8>>,
}

impl ThreadWindow {
    fn shard(&self, rank: usize) -> Result<Arc<Vec<u8>>, DomainError> {
        if rank >= self.world.size {
            return Err(DomainError::Transport {
                op: "window read",
                peer: rank,
            });
        }
        self.world
            .shards
            .lock()
            .expect("world shards poisoned")
            .get(&(self.seq, rank))
            .cloned()
            .ok_or(DomainError::Transport {
                op: "window read",
                peer: rank,
            })
    }
}

impl RmaWindow for ThreadWindow {
    fn local(&self) -> &[u8] {
        &self.local
    }

    fn shard_len(&self, rank: usize) -> Result<usize, DomainError> {
        Ok(self.shard(rank)?.len())
    }

    fn read(&self, rank: usize, offset: usize, out: &mut [u8]) -> Result<(), DomainError> {
        let shard = self.shard(rank)?;
        if offset + out.len() > shard.len() {
            return Err(DomainError::Transport {
                op: "window read",
                peer: rank,
            });
        }
        out.copy_from_slice(&shard[offset..offset + out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::ReduceOp;

    #[test]
    fn round_trip() {
        let mut world = ThreadComm::world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        let msg = b"hello";
        let _s = c0.isend(1, 0x1000, msg);

        let mut buf = [0u8; 5];
        let h = c1.irecv(0, 0x1000, &mut buf);
        assert_eq!(h.wait().unwrap(), msg);
    }

    #[test]
    fn fifo_order_per_route() {
        let mut world = ThreadComm::world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        for i in 0..10u8 {
            let _ = c0.isend(1, 0x1001, &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            let h = c1.irecv(0, 0x1001, &mut b);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn routes_are_isolated_by_tag() {
        let mut world = ThreadComm::world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        let _ = c0.isend(1, 0xB0, b"later");
        let _ = c0.isend(1, 0xA0, b"first");

        let mut buf = [0u8; 5];
        let h = c1.irecv(0, 0xA0, &mut buf);
        assert_eq!(h.wait().unwrap(), b"first");
        let h = c1.irecv(0, 0xB0, &mut buf);
        assert_eq!(h.wait().unwrap(), b"later");
    }

    #[test]
    fn worlds_do_not_share_messages() {
        let mut a = ThreadComm::world(2);
        let mut b = ThreadComm::world(2);
        let a1 = a.pop().unwrap();
        let a0 = a.pop().unwrap();
        let b1 = b.pop().unwrap();
        drop(b.pop());

        let _ = a0.isend(1, 0x42, b"ours");
        // The message is visible on world A's route only.
        let mut buf = [0u8; 4];
        assert_eq!(a1.irecv(0, 0x42, &mut buf).wait().unwrap(), b"ours");
        let _ = b1; // world B never saw anything to receive
    }

    #[test]
    fn collectives_across_threads() {
        let world = ThreadComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let gathered = comm.all_gather_i64(comm.rank() as i64 * 10).unwrap();
                    let mut mins = [comm.rank() as i64, 100];
                    comm.all_reduce_i64(&mut mins, ReduceOp::Min).unwrap();
                    (gathered, mins)
                })
            })
            .collect();
        for h in handles {
            let (gathered, mins) = h.join().unwrap();
            assert_eq!(gathered, vec![0, 10, 20]);
            assert_eq!(mins, [0, 100]);
        }
    }

    #[test]
    fn windows_are_one_sided() {
        let world = ThreadComm::world(2);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let mine = vec![comm.rank() as u8; 4];
                    let win = comm.open_window(mine).unwrap();
                    // Read the peer's shard without the peer cooperating.
                    let peer = 1 - comm.rank();
                    let mut out = [9u8; 4];
                    win.read(peer, 0, &mut out).unwrap();
                    assert_eq!(out, [peer as u8; 4]);
                    assert_eq!(win.local(), &[comm.rank() as u8; 4]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
