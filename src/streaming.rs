//! The streaming-step contract between the domain and the collision kernel.
//!
//! Both distribution buffers have length
//! `local_fluid_count · Q + 1 + total_shared`: the local slots, one
//! sacrificial rubbish slot, and the shared region partitioned across the
//! neighbouring peers. A tick is `collide → exchange → gather → swap`; the
//! kernel writes post-collision values through the domain's neighbour-index
//! table, the exchange swaps the shared region with each peer, and the
//! gather lands the received values in their receiver slots.

use bytemuck::cast_slice;

use crate::comm::communicator::tags;
use crate::comm::{Communicator, Wait};
use crate::domain::Domain;
use crate::error::DomainError;

/// The pair of distribution arrays the LB kernel ticks between.
#[derive(Debug)]
pub struct DistributionBuffers {
    f_old: Vec<f64>,
    f_new: Vec<f64>,
}

impl DistributionBuffers {
    /// Allocate zeroed buffers sized for `domain`.
    pub fn new<C: Communicator>(domain: &Domain<C>) -> Self {
        let len = domain.distribution_buffer_len();
        DistributionBuffers {
            f_old: vec![0.0; len],
            f_new: vec![0.0; len],
        }
    }

    /// The pre-streaming distribution array.
    #[inline]
    pub fn f_old(&self) -> &[f64] {
        &self.f_old
    }

    /// Mutable access for initial conditions and checkpoint restore.
    #[inline]
    pub fn f_old_mut(&mut self) -> &mut [f64] {
        &mut self.f_old
    }

    /// The post-streaming distribution array.
    #[inline]
    pub fn f_new(&self) -> &[f64] {
        &self.f_new
    }

    /// Stream every local distribution to its pre-computed target.
    ///
    /// This is the identity-collision form of the kernel contract: a real
    /// collision computes a post-collision value per `(site, direction)`
    /// and deposits it at the same target.
    pub fn propagate<C: Communicator>(&mut self, domain: &Domain<C>) {
        let q = domain.num_vectors();
        let count = domain.local_fluid_site_count() as usize;
        let targets = domain.neighbour_indices();
        for i in 0..count * q {
            self.f_new[targets[i] as usize] = self.f_old[i];
        }
    }

    /// Swap the shared region with every neighbouring peer: send this
    /// worker's run of `f_new`, receive the peer's into the same run of
    /// `f_old`.
    pub fn exchange<C: Communicator>(&mut self, domain: &Domain<C>) -> Result<(), DomainError> {
        let comm = &domain.comm;
        let mut recvs = Vec::with_capacity(domain.neighbouring_procs().len());
        for np in domain.neighbouring_procs() {
            let len = np.shared_distribution_count as usize;
            let mut buf = vec![0u8; len * std::mem::size_of::<f64>()];
            recvs.push((np, comm.irecv(np.rank as usize, tags::STREAM.get(), &mut buf)));
        }
        let mut sends = Vec::with_capacity(domain.neighbouring_procs().len());
        for np in domain.neighbouring_procs() {
            let start = np.first_shared_distribution as usize;
            let len = np.shared_distribution_count as usize;
            sends.push(comm.isend(
                np.rank as usize,
                tags::STREAM.get(),
                cast_slice(&self.f_new[start..start + len]),
            ));
        }
        for (np, h) in recvs {
            let peer = np.rank as usize;
            let data = h.wait().ok_or(DomainError::Transport {
                op: "distribution exchange",
                peer,
            })?;
            let start = np.first_shared_distribution as usize;
            let len = np.shared_distribution_count as usize;
            if data.len() != len * std::mem::size_of::<f64>() {
                return Err(DomainError::Transport {
                    op: "distribution exchange",
                    peer,
                });
            }
            for (chunk, slot) in data.chunks_exact(8).zip(&mut self.f_old[start..start + len]) {
                *slot = f64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
            }
        }
        for s in sends {
            s.wait();
        }
        Ok(())
    }

    /// Copy the received shared distributions into their receiver slots of
    /// `f_new`.
    pub fn copy_received<C: Communicator>(&mut self, domain: &Domain<C>) {
        let Some(first) = domain.neighbouring_procs().first() else {
            return;
        };
        let base = first.first_shared_distribution as usize;
        for (i, &target) in domain
            .streaming_indices_for_received_distributions()
            .iter()
            .enumerate()
        {
            self.f_new[target as usize] = self.f_old[base + i];
        }
    }

    /// Make the freshly streamed array the input of the next tick.
    #[inline]
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.f_old, &mut self.f_new);
    }

    /// One full identity-collision tick.
    pub fn tick<C: Communicator>(&mut self, domain: &Domain<C>) -> Result<(), DomainError> {
        self.propagate(domain);
        self.exchange(domain)?;
        self.copy_received(domain);
        self.swap();
        Ok(())
    }
}
