/* ************************************************************************ **
** This file is part of rsp2, and is licensed under EITHER the MIT license  **
** or the Apache 2.0 license, at your option.                               **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
**                                                                          **
** Be aware that not all of rsp2 is provided under this permissive license, **
** and that the project as a whole is licensed under the GPL 3.0.           **
** ************************************************************************ */

//! Inter-replica coordination for nudged elastic band (NEB) path searches.
//!
//! A chain of replicas, each simulated by its own group of processes with its own
//! domain decomposition, represents discrete images along a reaction path.
//! Once per minimizer iteration, every replica needs the positions that its two
//! neighbors along the chain assign to each of its atoms; these are matched by
//! atom tag, never by local index. From those it builds a path tangent and rewrites
//! the forces on the NEB atoms so that the minimizer relaxes the path as a whole.
//!
//! The pieces, leaves first:
//!
//! * [`comm`]: the communication scopes (a `Communicator` trait, with an in-process
//!   backend in [`local`] and an MPI backend behind the `mpi-support` feature).
//! * [`topology`]: where this replica sits in the chain.
//! * [`buffer`]: amortized per-atom buffers.
//! * [`exchange`]: the tag-matched neighbor exchange.
//! * [`tangent`]: the tangent and force mixing.
//! * [`fix`]: lifecycle hooks that tie it together for a host engine.
//! * [`report`]: chain-wide summaries for progress output.

#![deny(unused_must_use)]

#[macro_use] extern crate failure;
#[macro_use] extern crate log;

pub type FailResult<T> = Result<T, failure::Error>;

/// A stable, globally unique atom identity.
pub type Tag = u64;

/// Cartesian vector.
pub type V3 = [f64; 3];

/// `bail!` for typed errors.
macro_rules! throw {
    ($e:expr) => { return Err(::failure::Error::from($e)) };
}

pub mod comm;
pub mod local;
#[cfg(feature = "mpi-support")]
pub mod mpi_comm;
pub mod topology;
pub mod buffer;
pub mod exchange;
pub mod tangent;
pub mod host;
pub mod fix;
pub mod report;
mod errors;
pub(crate) mod math;

pub use crate::errors::NebError;
pub use crate::comm::{Communicator, ReplicaComms, Rank};
pub use crate::topology::{ReplicaTopology, ImageRole};
pub use crate::host::{Host, Atoms, GroupBit, MinimumImage, NonPeriodic, Orthorhombic};
pub use crate::fix::{NebFix, NebSettings, ExchangeMode, MinimizeHook, HookTable};
pub use crate::tangent::{EndpointMode, Energies, MixParams, PathStats};
pub use crate::report::PathReport;

#[cfg(test)]
pub(crate) mod test_util;
