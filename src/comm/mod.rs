//! Communication abstraction for the bulk-synchronous worker model.
//!
//! This module re-exports the [`communicator`], [`thread`] and [`window`]
//! submodules (plus [`mpi`] behind the `mpi-support` feature).

pub mod communicator;
#[cfg(feature = "mpi-support")]
pub mod mpi;
pub mod thread;
pub mod window;

pub use communicator::{tags, CommTag, Communicator, ExchangeTags, NoComm, ReduceOp, Wait};
#[cfg(feature = "mpi-support")]
pub use mpi::MpiComm;
pub use thread::ThreadComm;
pub use window::RmaWindow;
