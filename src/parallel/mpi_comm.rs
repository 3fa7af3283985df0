//! MPI backend for [`Comm`](super::Comm), available with the `mpi` feature.
//!
//! Point-to-point messages use buffered sends (`MPI_Bsend`) so a rank can post all of a
//! phase's sends before receiving. The attached buffer must hold every message of the largest
//! phase; the default is generous for coarse data and interface blocks of moderate size.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")] {
//! use bddc::parallel::{Comm, MpiComm};
//! let comm = MpiComm::new().expect("MPI initialization");
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier();
//! # }
//! ```

use super::{Comm, Tag};
use crate::error::BddcError;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use std::sync::Arc;

/// MPI communicator wrapper. Clones share the MPI environment, which is finalized when the
/// last clone is dropped. Cloning duplicates the communicator and is collective.
pub struct MpiComm {
    universe: Arc<Universe>,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Bytes attached for buffered sends.
    pub const BUFFER_BYTES: usize = 64 << 20;

    /// Initializes MPI and wraps the world communicator.
    pub fn new() -> Result<Self, BddcError> {
        let mut universe = mpi::initialize()
            .ok_or_else(|| BddcError::Comm("MPI was already initialized".into()))?;
        universe.set_buffer_size(Self::BUFFER_BYTES);
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm {
            universe: Arc::new(universe),
            world,
            rank,
            size,
        })
    }
}

impl Clone for MpiComm {
    fn clone(&self) -> Self {
        MpiComm {
            universe: Arc::clone(&self.universe),
            world: self.world.duplicate(),
            rank: self.rank,
            size: self.size,
        }
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn send_bytes(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<(), BddcError> {
        if dest >= self.size {
            return Err(BddcError::Comm(format!("no rank {dest} in a world of {}", self.size)));
        }
        self.world
            .process_at_rank(dest as i32)
            .buffered_send_with_tag(&data[..], i32::from(tag));
        Ok(())
    }

    fn recv_bytes(&self, src: usize, tag: Tag) -> Result<Vec<u8>, BddcError> {
        if src >= self.size {
            return Err(BddcError::Comm(format!("no rank {src} in a world of {}", self.size)));
        }
        let (msg, _status) = self
            .world
            .process_at_rank(src as i32)
            .receive_vec_with_tag::<u8>(i32::from(tag));
        Ok(msg)
    }
}
