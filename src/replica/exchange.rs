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

//! Tag-matched exchange of atom positions between neighboring replicas.
//!
//! Each process sends the `(tag, position)` list of the NEB atoms it owns, and ends
//! up with the positions that the previous and next replica assign to each of them.
//! Two strategies produce the lists that each process joins against:
//!
//! * [`DirectExchange`]: every process trades lists with the process holding the
//!   same replica rank in the neighboring replicas.  Only valid when those
//!   processes own the same atoms.
//! * [`GatheredExchange`]: each replica gathers its full list onto its root, the
//!   roots trade lists, and each root broadcasts what it received to its replica.
//!
//! Either way, the final step is an inner join on tag ([`match_by_tag`]).
//!
//! # Deadlock freedom
//!
//! Data moves along the chain in two shifts: toward the next replica, then toward
//! the previous one.  Within a shift, even replicas send then receive while odd
//! replicas receive then send.  Neighbors always differ in parity, so every blocking
//! send is posted against a process that is either already receiving from it or
//! will be as soon as its own send (which faces a receiver) completes.  The chain is
//! open at both ends, so these waits cannot form a cycle.

use crate::{FailResult, Tag, V3};
use crate::errors::NebError;
use crate::comm::{Communicator, Datum, MessageTag, Rank, ReplicaComms};
use crate::topology::ReplicaTopology;
use crate::tangent::Energies;

use slice_of_array::prelude::*;
use std::collections::HashMap;

mod msg {
    use crate::comm::MessageTag;

    pub const ENERGY_TO_NEXT: MessageTag = 1;
    pub const ENERGY_TO_PREV: MessageTag = 2;
    pub const TAGS_TO_NEXT: MessageTag = 3;
    pub const COORDS_TO_NEXT: MessageTag = 4;
    pub const TAGS_TO_PREV: MessageTag = 5;
    pub const COORDS_TO_PREV: MessageTag = 6;
    pub const VERIFY_TO_NEXT: MessageTag = 7;
    pub const VERIFY_TO_PREV: MessageTag = 8;
}

/// Which neighbor a list came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction { Prev, Next }

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Prev => "previous",
            Direction::Next => "next",
        }
    }
}

/// `(tag, position)` pairs, in the flat layout used on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomList {
    pub tags: Vec<Tag>,
    /// `3 * tags.len()` coordinates.
    pub x: Vec<f64>,
}

impl AtomList {
    fn check_sizes(&self, source: Rank) -> FailResult<()> {
        if self.x.len() != 3 * self.tags.len() {
            throw!(NebError::MalformedMessage {
                source,
                what: format!("{} coordinates for {} atoms", self.x.len(), self.tags.len()),
            });
        }
        Ok(())
    }

    pub fn positions(&self) -> &[V3] { self.x.nest() }
}

/// The lists this process must join against.  `None` at the ends of the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborLists {
    pub prev: Option<AtomList>,
    pub next: Option<AtomList>,
}

/// One way of producing [`NeighborLists`].
///
/// # MPI
///
/// `exchange` is collective over both scopes.
pub trait NeighborExchange<C: Communicator> {
    fn name(&self) -> &'static str;

    /// `tags` and `x` are this process's NEB atoms (`x` flat, 3 per atom).
    fn exchange(
        &mut self,
        comms: &ReplicaComms<C>,
        topo: &ReplicaTopology,
        tags: &[Tag],
        x: &[f64],
    ) -> FailResult<NeighborLists>;
}

//--------------------------------------------------------------------------------------------------

/// Fast path for mirrored decompositions.
#[derive(Debug, Clone, Default)]
pub struct DirectExchange;

impl DirectExchange {
    /// Check that counterpart processes own exactly the same NEB atoms.
    ///
    /// # MPI
    ///
    /// Collective over `comms.world`.  Every process gets the same answer.
    pub fn verify<C: Communicator>(
        comms: &ReplicaComms<C>,
        topo: &ReplicaTopology,
        local_tags: &[Tag],
    ) -> FailResult<()> {
        if !topo.is_uniform() {
            throw!(NebError::DirectExchangeUnavailable(
                "replicas do not all run on the same number of processes".into(),
            ));
        }

        let mut sorted = local_tags.to_vec();
        sorted.sort();

        let prev = topo.prev().and_then(|r| topo.counterpart(r));
        let next = topo.next().and_then(|r| topo.counterpart(r));
        let from_prev = shift(&comms.world, topo, next, prev, msg::VERIFY_TO_NEXT, &sorted)?;
        let from_next = shift(&comms.world, topo, prev, next, msg::VERIFY_TO_PREV, &sorted)?;

        let agrees = |other: Option<Vec<Tag>>| other.map_or(true, |other| other == sorted);
        let mismatch = match agrees(from_prev) && agrees(from_next) {
            true => 0.0,
            false => 1.0,
        };
        if comms.world.all_max(mismatch)? > 0.0 {
            throw!(NebError::DirectExchangeUnavailable(
                "processes with the same replica rank do not own the same atoms".into(),
            ));
        }
        Ok(())
    }

    fn counterpart(topo: &ReplicaTopology, replica: Option<usize>) -> FailResult<Option<Rank>> {
        match replica {
            None => Ok(None),
            Some(replica) => match topo.counterpart(replica) {
                Some(rank) => Ok(Some(rank)),
                None => throw!(NebError::DirectExchangeUnavailable(format!(
                    "replica {} has no process with replica rank {}", replica, topo.me,
                ))),
            },
        }
    }
}

impl<C: Communicator> NeighborExchange<C> for DirectExchange {
    fn name(&self) -> &'static str { "direct" }

    fn exchange(
        &mut self,
        comms: &ReplicaComms<C>,
        topo: &ReplicaTopology,
        tags: &[Tag],
        x: &[f64],
    ) -> FailResult<NeighborLists> {
        let prev = DirectExchange::counterpart(topo, topo.prev())?;
        let next = DirectExchange::counterpart(topo, topo.next())?;

        let outgoing = (tags, x);
        Ok(NeighborLists {
            prev: shift_list(&comms.world, topo, next, prev, ToNext, outgoing)?,
            next: shift_list(&comms.world, topo, prev, next, ToPrev, outgoing)?,
        })
    }
}

//--------------------------------------------------------------------------------------------------

/// General path, for replicas whose decompositions have nothing to do with each other.
#[derive(Debug, Clone, Default)]
pub struct GatheredExchange;

impl<C: Communicator> NeighborExchange<C> for GatheredExchange {
    fn name(&self) -> &'static str { "gather" }

    fn exchange(
        &mut self,
        comms: &ReplicaComms<C>,
        topo: &ReplicaTopology,
        tags: &[Tag],
        x: &[f64],
    ) -> FailResult<NeighborLists> {
        let gathered_tags = comms.replica.gather_varcount(0, tags)?;
        let gathered_x = comms.replica.gather_varcount(0, x)?;

        let (from_prev, from_next) = match (gathered_tags, gathered_x) {
            (Some(all_tags), Some(all_x)) => {
                for (rank, (&ntags, &nx)) in all_tags.counts.iter().zip(&all_x.counts).enumerate() {
                    if nx != 3 * ntags {
                        throw!(NebError::MalformedMessage {
                            source: rank,
                            what: format!("gathered {} coordinates for {} atoms", nx, ntags),
                        });
                    }
                }
                trace!("gathered {} NEB atoms from {} processes", all_tags.data.len(), all_tags.counts.len());

                let prev = topo.prev().map(|r| topo.root_of(r));
                let next = topo.next().map(|r| topo.root_of(r));
                let outgoing = (&all_tags.data[..], &all_x.data[..]);
                let from_prev = shift_list(&comms.world, topo, next, prev, ToNext, outgoing)?;
                let from_next = shift_list(&comms.world, topo, prev, next, ToPrev, outgoing)?;
                (from_prev, from_next)
            },
            (None, None) => (None, None),
            _ => bail!("gathered tags and coordinates disagree on the root"),
        };

        Ok(NeighborLists {
            prev: match topo.prev() {
                Some(_) => Some(broadcast_list(&comms.replica, from_prev)?),
                None => None,
            },
            next: match topo.next() {
                Some(_) => Some(broadcast_list(&comms.replica, from_next)?),
                None => None,
            },
        })
    }
}

//--------------------------------------------------------------------------------------------------

/// Fill `out[i]` for every local NEB atom `i` with the position of the atom with the
/// same tag in `list`.
///
/// Atoms outside the group (`is_neb(i) == false`) are left alone.
pub fn match_by_tag(
    list: &AtomList,
    direction: Direction,
    local_tags: &[Tag],
    is_neb: impl Fn(usize) -> bool,
    out: &mut [V3],
) -> FailResult<()> {
    let mut rows = HashMap::with_capacity(list.tags.len());
    for (row, &tag) in list.tags.iter().enumerate() {
        if rows.insert(tag, row).is_some() {
            throw!(NebError::DuplicateIdentity { tag, direction: direction.name() });
        }
    }

    let positions = list.positions();
    for (i, &tag) in local_tags.iter().enumerate() {
        if !is_neb(i) {
            continue;
        }
        match rows.get(&tag) {
            Some(&row) => out[i] = positions[row],
            None => throw!(NebError::IdentityMismatch { tag, direction: direction.name() }),
        }
    }
    Ok(())
}

/// Trade this replica's energy with the neighboring replicas.
///
/// # MPI
///
/// Collective over both scopes.  Every process of a replica must pass the same `energy`.
pub fn exchange_energies<C: Communicator>(
    comms: &ReplicaComms<C>,
    topo: &ReplicaTopology,
    energy: f64,
) -> FailResult<Energies> {
    let root_data = match topo.is_replica_root() {
        false => None,
        true => {
            let prev = topo.prev().map(|r| topo.root_of(r));
            let next = topo.next().map(|r| topo.root_of(r));
            let from_prev = shift(&comms.world, topo, next, prev, msg::ENERGY_TO_NEXT, &[energy])?;
            let from_next = shift(&comms.world, topo, prev, next, msg::ENERGY_TO_PREV, &[energy])?;

            let mut data = vec![];
            for (received, source) in vec![(from_prev, prev), (from_next, next)] {
                if let (Some(received), Some(source)) = (received, source) {
                    if received.len() != 1 {
                        throw!(NebError::MalformedMessage {
                            source,
                            what: format!("expected one energy, got {}", received.len()),
                        });
                    }
                    data.push(received[0]);
                }
            }
            Some(data)
        },
    };

    // Which entries are present is implied by the topology.
    let mut data = comms.replica.broadcast(0, root_data)?.into_iter();
    let prev = topo.prev().and_then(|_| data.next());
    let next = topo.next().and_then(|_| data.next());
    Ok(Energies { this: energy, prev, next })
}

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone)]
enum Shift { ToNext, ToPrev }
use self::Shift::{ToNext, ToPrev};

/// Send `data` to `dest` and receive from `source`, in an order decided by parity.
///
/// Either end may be `None` (the ends of the chain), in which case that half is skipped.
fn shift<C: Communicator, T: Datum>(
    world: &C,
    topo: &ReplicaTopology,
    dest: Option<Rank>,
    source: Option<Rank>,
    tag: MessageTag,
    data: &[T],
) -> FailResult<Option<Vec<T>>> {
    let send = || match dest {
        Some(dest) => world.send(dest, tag, data),
        None => Ok(()),
    };
    let receive = || match source {
        Some(source) => world.receive(source, tag).map(Some),
        None => Ok(None),
    };

    match topo.sends_first() {
        true => {
            send()?;
            receive()
        },
        false => {
            let received = receive()?;
            send()?;
            Ok(received)
        },
    }
}

fn shift_list<C: Communicator>(
    world: &C,
    topo: &ReplicaTopology,
    dest: Option<Rank>,
    source: Option<Rank>,
    which: Shift,
    (tags, x): (&[Tag], &[f64]),
) -> FailResult<Option<AtomList>> {
    let (tags_tag, coords_tag) = match which {
        ToNext => (msg::TAGS_TO_NEXT, msg::COORDS_TO_NEXT),
        ToPrev => (msg::TAGS_TO_PREV, msg::COORDS_TO_PREV),
    };
    let received_tags = shift(world, topo, dest, source, tags_tag, tags)?;
    let received_x = shift(world, topo, dest, source, coords_tag, x)?;

    match (received_tags, received_x, source) {
        (Some(tags), Some(x), Some(source)) => {
            let list = AtomList { tags, x };
            list.check_sizes(source)?;
            Ok(Some(list))
        },
        _ => Ok(None),
    }
}

fn broadcast_list<C: Communicator>(replica: &C, list: Option<AtomList>) -> FailResult<AtomList> {
    let (tags, x) = match list {
        Some(AtomList { tags, x }) => (Some(tags), Some(x)),
        None => (None, None),
    };
    let list = AtomList {
        tags: replica.broadcast(0, tags)?,
        x: replica.broadcast(0, x)?,
    };
    list.check_sizes(0)?;
    Ok(list)
}
