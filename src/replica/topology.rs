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

use crate::FailResult;
use crate::errors::NebError;
use crate::comm::{Communicator, Rank, ReplicaComms};

/// Where an image sits in the chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageRole {
    /// Replica 0.  Has no previous image.
    First,
    Interior,
    /// The last replica.  Has no next image.
    Last,
}

/// Static description of the chain of replicas, as seen by one process.
///
/// This is computed once and never changes for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaTopology {
    /// Number of replicas in the chain.
    pub nreplica: usize,
    /// This process's replica.
    pub ireplica: usize,
    /// This process's rank within its replica.
    pub me: Rank,
    /// Number of processes working on this replica.
    pub nprocs: usize,
    /// This process's rank in the world.
    pub me_universe: Rank,
    pub nprocs_universe: usize,

    // World ranks of every replica's processes, ordered by replica rank.
    members: Vec<Vec<Rank>>,
}

impl ReplicaTopology {
    /// Derive the topology for `nreplica` equally sized replicas occupying
    /// contiguous blocks of world ranks.
    pub fn from_universe_rank(
        me_universe: Rank,
        nprocs_universe: usize,
        nreplica: usize,
    ) -> FailResult<Self> {
        if nreplica < 2 {
            throw!(NebError::TooFewReplicas(nreplica));
        }
        if nprocs_universe % nreplica != 0 {
            throw!(NebError::BadLayout(format!(
                "{} processes cannot be split evenly into {} replicas", nprocs_universe, nreplica,
            )));
        }
        if me_universe >= nprocs_universe {
            throw!(NebError::BadLayout(format!(
                "rank {} is out of range for a world of {}", me_universe, nprocs_universe,
            )));
        }

        let nprocs = nprocs_universe / nreplica;
        let members = {
            (0..nreplica)
                .map(|i| (i * nprocs..(i + 1) * nprocs).collect())
                .collect()
        };
        Ok(ReplicaTopology {
            nreplica,
            ireplica: me_universe / nprocs,
            me: me_universe % nprocs,
            nprocs,
            me_universe,
            nprocs_universe,
            members,
        })
    }

    /// Derive the topology of an arbitrary layout, where each process knows only
    /// which replica it works on.
    ///
    /// # MPI
    ///
    /// Collective over `comms.world`.
    pub fn discover<C: Communicator>(comms: &ReplicaComms<C>, ireplica: usize) -> FailResult<Self> {
        let replica_indices = comms.world.all_gather(ireplica as u64)?;
        let replica_ranks = comms.world.all_gather(comms.replica.rank() as u64)?;

        let nreplica = match replica_indices.iter().max() {
            Some(&max) => max as usize + 1,
            None => 0,
        };
        if nreplica < 2 {
            throw!(NebError::TooFewReplicas(nreplica));
        }

        let mut members = vec![vec![]; nreplica];
        for (world_rank, (&i, &r)) in replica_indices.iter().zip(&replica_ranks).enumerate() {
            members[i as usize].push((r as Rank, world_rank));
        }

        let members: Vec<Vec<Rank>> = {
            members.into_iter().enumerate()
                .map(|(i, mut ranks)| -> FailResult<Vec<Rank>> {
                    if ranks.is_empty() {
                        throw!(NebError::BadLayout(format!("replica {} has no processes", i)));
                    }
                    ranks.sort();
                    for (expected, &(replica_rank, _)) in ranks.iter().enumerate() {
                        if replica_rank != expected {
                            throw!(NebError::BadLayout(format!(
                                "replica {} does not have contiguous replica ranks", i,
                            )));
                        }
                    }
                    Ok(ranks.into_iter().map(|(_, world_rank)| world_rank).collect())
                })
                .collect::<FailResult<_>>()?
        };

        let nprocs = members[ireplica].len();
        if nprocs != comms.replica.size() {
            throw!(NebError::BadLayout(format!(
                "replica {} has {} processes in the world, but its own communicator has {}",
                ireplica, nprocs, comms.replica.size(),
            )));
        }

        Ok(ReplicaTopology {
            nreplica,
            ireplica,
            me: comms.replica.rank(),
            nprocs,
            me_universe: comms.world.rank(),
            nprocs_universe: comms.world.size(),
            members,
        })
    }

    pub fn prev(&self) -> Option<usize> {
        match self.ireplica {
            0 => None,
            i => Some(i - 1),
        }
    }

    pub fn next(&self) -> Option<usize> {
        match self.ireplica + 1 {
            n if n == self.nreplica => None,
            n => Some(n),
        }
    }

    pub fn role(&self) -> ImageRole {
        match (self.prev(), self.next()) {
            (None, _) => ImageRole::First,
            (_, None) => ImageRole::Last,
            _ => ImageRole::Interior,
        }
    }

    /// Is this process the root of its replica?
    pub fn is_replica_root(&self) -> bool { self.me == 0 }

    /// World rank of the root process of a replica.
    pub fn root_of(&self, replica: usize) -> Rank { self.members[replica][0] }

    /// World rank of the process with the same replica rank as this one in another replica.
    pub fn counterpart(&self, replica: usize) -> Option<Rank> {
        self.members[replica].get(self.me).cloned()
    }

    /// Number of processes working on a replica.
    pub fn nprocs_of(&self, replica: usize) -> usize { self.members[replica].len() }

    /// Do all replicas run on the same number of processes?
    pub fn is_uniform(&self) -> bool {
        self.members.iter().all(|m| m.len() == self.nprocs)
    }

    /// Even replicas send first, odd replicas receive first.
    pub(crate) fn sends_first(&self) -> bool { self.ireplica % 2 == 0 }
}
