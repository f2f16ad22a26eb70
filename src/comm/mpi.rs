//! MPI backend over `rsmpi`.
//!
//! Point-to-point operations post immediate sends/receives against a
//! [`FlightBuffer`], a heap allocation the backend owns for exactly as long
//! as the request is in flight. Handles complete on [`Wait::wait`]; a
//! handle dropped without being waited completes the transfer itself (and
//! logs a warning), so a request can never outlive the bytes it borrows.
//! Collectives map to the native MPI calls. Window opens mirror every
//! rank's shard locally: shards are immutable after the collective open,
//! so subsequent one-sided reads never touch the wire.

use mpi::collective::{CommunicatorCollectives, SystemOperation};
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::request::{Request, StaticScope};
use mpi::topology::{Communicator as _, SimpleCommunicator};
use tracing::warn;

use crate::comm::communicator::{tags, Communicator, ReduceOp, Wait};
use crate::comm::window::RmaWindow;
use crate::error::DomainError;

/// Heap bytes loaned to an in-flight request.
///
/// The request APIs want a `'static` borrow, so the allocation is parked
/// behind a raw pointer for the flight and reclaimed exactly once, after
/// the request has completed. Reclaiming while the request is live would
/// free bytes MPI may still touch; [`InFlight`] upholds that ordering.
struct FlightBuffer(*mut [u8]);

impl FlightBuffer {
    fn stage(bytes: Vec<u8>) -> Self {
        FlightBuffer(Box::into_raw(bytes.into_boxed_slice()))
    }

    /// Loan the bytes to a request.
    ///
    /// Callers must not reclaim until the request completed.
    unsafe fn loan(&self) -> &'static mut [u8] {
        unsafe { &mut *self.0 }
    }

    /// Take the allocation back once the transfer is done.
    fn reclaim(self) -> Vec<u8> {
        unsafe { Box::from_raw(self.0) }.into_vec()
    }
}

// The pointee is owned by this value alone while in flight.
unsafe impl Send for FlightBuffer {}

/// One posted request plus the buffer it is reading from or writing into.
struct InFlight {
    request: Request<'static, [u8], StaticScope>,
    buffer: FlightBuffer,
}

impl InFlight {
    /// Block until the transfer is done and hand the buffer back.
    fn complete(self) -> Vec<u8> {
        let _ = self.request.wait();
        self.buffer.reclaim()
    }
}

/// Send handle; completes the transfer on wait or on drop.
pub struct MpiSendHandle(Option<InFlight>);

impl Wait for MpiSendHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(flight) = self.0.take() {
            flight.complete();
        }
        None
    }
}

impl Drop for MpiSendHandle {
    fn drop(&mut self) {
        if let Some(flight) = self.0.take() {
            warn!("send handle dropped before wait; completing the send");
            flight.complete();
        }
    }
}

/// Receive handle; yields the received bytes on wait. Dropping without
/// waiting completes the receive and discards the data.
pub struct MpiRecvHandle {
    flight: Option<InFlight>,
    want_len: usize,
}

impl Wait for MpiRecvHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        let mut bytes = self.flight.take()?.complete();
        bytes.truncate(self.want_len);
        Some(bytes)
    }
}

impl Drop for MpiRecvHandle {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            warn!("receive handle dropped before wait; discarding the message");
            flight.complete();
        }
    }
}

/// Communicator over `MPI_COMM_WORLD`.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl Default for MpiComm {
    fn default() -> Self {
        let uni = mpi::initialize().expect("MPI initialization failed");
        let world = uni.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Self {
            _universe: uni,
            world,
            rank,
            size,
        }
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiSendHandle;
    type RecvHandle = MpiRecvHandle;
    type Window = MpiWindow;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let buffer = FlightBuffer::stage(buf.to_vec());
        let loan: &'static [u8] = unsafe { buffer.loan() };
        let request = self
            .world
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, loan, tag as i32);
        MpiSendHandle(Some(InFlight { request, buffer }))
    }

    fn irecv(&self, peer: usize, tag: u16, template: &mut [u8]) -> Self::RecvHandle {
        let want_len = template.len();
        let buffer = FlightBuffer::stage(vec![0u8; want_len]);
        let loan = unsafe { buffer.loan() };
        let request = self
            .world
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, loan, tag as i32);
        MpiRecvHandle {
            flight: Some(InFlight { request, buffer }),
            want_len,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn open_window(&self, shard: Vec<u8>) -> Result<Self::Window, DomainError> {
        // Mirror every shard: lengths first, then the payloads.
        let lens = self.all_gather_i64(shard.len() as i64)?;
        let mut shards: Vec<Vec<u8>> = vec![Vec::new(); self.size];
        let mut recvs = Vec::with_capacity(self.size.saturating_sub(1));
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            let mut buf = vec![0u8; lens[peer] as usize];
            recvs.push((peer, self.irecv(peer, tags::ALL_GATHER.get(), &mut buf)));
        }
        let mut sends = Vec::with_capacity(self.size.saturating_sub(1));
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            sends.push(self.isend(peer, tags::ALL_GATHER.get(), &shard));
        }
        for (peer, h) in recvs {
            shards[peer] = h.wait().ok_or(DomainError::Transport {
                op: "window open",
                peer,
            })?;
        }
        for s in sends {
            s.wait();
        }
        shards[self.rank] = shard;
        self.world.barrier();
        Ok(MpiWindow {
            rank: self.rank,
            shards,
        })
    }

    fn all_gather_i64(&self, value: i64) -> Result<Vec<i64>, DomainError> {
        let mut out = vec![0i64; self.size];
        self.world.all_gather_into(&value, &mut out[..]);
        Ok(out)
    }

    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), DomainError> {
        let mut recv = vec![0i64; values.len()];
        let sys = match op {
            ReduceOp::Min => SystemOperation::min(),
            ReduceOp::Max => SystemOperation::max(),
            ReduceOp::Sum => SystemOperation::sum(),
        };
        self.world.all_reduce_into(&values[..], &mut recv[..], sys);
        values.copy_from_slice(&recv);
        Ok(())
    }
}

/// Mirrored window: each rank holds a copy of every shard.
pub struct MpiWindow {
    rank: usize,
    shards: Vec<Vec<u8>>,
}

impl RmaWindow for MpiWindow {
    fn local(&self) -> &[u8] {
        &self.shards[self.rank]
    }

    fn shard_len(&self, rank: usize) -> Result<usize, DomainError> {
        self.shards
            .get(rank)
            .map(Vec::len)
            .ok_or(DomainError::Transport {
                op: "window shard_len",
                peer: rank,
            })
    }

    fn read(&self, rank: usize, offset: usize, out: &mut [u8]) -> Result<(), DomainError> {
        let shard = self.shards.get(rank).ok_or(DomainError::Transport {
            op: "window read",
            peer: rank,
        })?;
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
