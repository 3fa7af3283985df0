//! Message passing between subdomains.
//!
//! Every subdomain lives on its own rank. The [`Comm`] trait only asks a backend for
//! buffered sends and blocking receives; the collectives the preconditioner needs are
//! provided on top of them and always combine contributions in rank order, so every rank
//! observes bitwise-identical results.

use crate::error::BddcError;
use bytemuck::Pod;

pub mod local_comm;
pub mod mapping;
#[cfg(feature = "mpi")]
pub mod mpi_comm;

pub use local_comm::LocalComm;
pub use mapping::{LocalToGlobalMapping, Neighbour, SharingInfo};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Message tag.
pub type Tag = u16;

/// Tags of the communication phases. Messages with equal `(source, tag)` are delivered in
/// the order they were sent.
pub mod tags {
    use super::Tag;

    pub const REDUCE: Tag = 1;
    pub const GATHER: Tag = 2;
    pub const SHARING_QUERY: Tag = 10;
    pub const SHARING_REPLY: Tag = 11;
    pub const INTERFACE_SUM: Tag = 12;
    pub const MARKS: Tag = 20;
    pub const COMPONENT_LABELS: Tag = 21;
    pub const COMPONENT_CHECK: Tag = 22;
    pub const SCHUR_BLOCKS: Tag = 30;
    pub const PRIMAL_NUMBERING: Tag = 40;
    pub const COARSE_SETUP: Tag = 41;
    pub const COARSE_FORWARD: Tag = 42;
    pub const COARSE_REVERSE: Tag = 43;
    pub const FETIDP_JUMP: Tag = 50;
    pub const FETIDP_PC: Tag = 51;
}

/// Point-to-point message passing with collectives derived from it.
pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);

    /// Buffered send: returns as soon as `data` is handed to the transport.
    fn send_bytes(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<(), BddcError>;

    /// Blocking receive of the next message from `src` carrying `tag`.
    fn recv_bytes(&self, src: usize, tag: Tag) -> Result<Vec<u8>, BddcError>;

    fn send<T: Pod>(&self, dest: usize, tag: Tag, data: &[T]) -> Result<(), BddcError> {
        self.send_bytes(dest, tag, bytemuck::cast_slice(data).to_vec())
    }

    fn recv<T: Pod>(&self, src: usize, tag: Tag) -> Result<Vec<T>, BddcError> {
        let bytes = self.recv_bytes(src, tag)?;
        decode(&bytes)
    }

    /// Every rank receives the local slice of every rank, indexed by rank.
    fn all_gather<T: Pod>(&self, tag: Tag, local: &[T]) -> Result<Vec<Vec<T>>, BddcError> {
        for dest in 0..self.size() {
            self.send(dest, tag, local)?;
        }
        (0..self.size()).map(|src| self.recv(src, tag)).collect()
    }

    /// Global sum, accumulated in rank order.
    fn all_reduce_sum(&self, x: f64) -> Result<f64, BddcError> {
        let all = self.all_gather(tags::REDUCE, &[x])?;
        Ok(all.iter().filter_map(|v| v.first()).sum())
    }

    fn all_reduce_max(&self, x: u64) -> Result<u64, BddcError> {
        let all = self.all_gather(tags::REDUCE, &[x])?;
        Ok(all.iter().filter_map(|v| v.first()).copied().max().unwrap_or(x))
    }
}

/// Decode a byte message into `T` values.
pub(crate) fn decode<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, BddcError> {
    let width = std::mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(BddcError::Comm(format!(
            "message of {} bytes is not a whole number of {}-byte values",
            bytes.len(),
            width
        )));
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

/// Combine the outcome of a local step with every other rank's: if any rank failed, all of
/// them return an error. Keeps ranks from waiting on peers that already gave up.
pub(crate) fn agree<C: Comm, T>(
    comm: &C,
    step: &'static str,
    local: Result<T, BddcError>,
) -> Result<T, BddcError> {
    let failed = comm.all_reduce_max(u64::from(local.is_err()))?;
    match local {
        Ok(_) if failed > 0 => Err(BddcError::Comm(format!(
            "{step} failed on another rank"
        ))),
        other => other,
    }
}

/// Fail with a topology error when a neighbour sent a message of unexpected length.
pub(crate) fn expect_len(
    rank: usize,
    step: &'static str,
    from: usize,
    got: usize,
    want: usize,
) -> Result<(), BddcError> {
    if got == want {
        Ok(())
    } else {
        Err(BddcError::Topology {
            rank,
            step,
            detail: format!("rank {from} sent {got} entries, expected {want}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_ragged_messages() {
        let bytes = vec![0u8; 12];
        assert!(decode::<f64>(&bytes).is_err());
        assert_eq!(decode::<u32>(&bytes).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn all_reduce_is_identical_on_every_rank() {
        let sums = LocalComm::run(4, |comm| {
            let x = 0.1 * (comm.rank() + 1) as f64;
            comm.all_reduce_sum(x).unwrap()
        });
        for s in &sums {
            assert_eq!(s.to_bits(), sums[0].to_bits());
        }
        assert!((sums[0] - 1.0).abs() < 1e-12);
    }
}
