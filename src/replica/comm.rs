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

//! Communication scopes.
//!
//! Every operation here is blocking from the caller's perspective, and every
//! collective must be entered by all processes of the communicator in the same
//! order.  There are no timeouts; a failed exchange is fatal to the whole run.
//!
//! Backends only need to supply point-to-point messaging.  The collectives have
//! default implementations built on top of it, which backends with native
//! collectives (MPI) may override.

use crate::FailResult;
use crate::errors::NebError;

/// Index of a process within a communicator.
pub type Rank = usize;

/// Distinguishes messages between the same pair of processes.
///
/// Nonnegative so that it can be handed to MPI unchanged.
pub type MessageTag = i32;

/// Tags reserved for the default collective implementations.
pub(crate) mod reserved {
    use super::MessageTag;

    pub const GATHER: MessageTag = 30_001;
    pub const BROADCAST: MessageTag = 30_002;
}

/// Element types that can be sent between processes.
#[cfg(not(feature = "mpi-support"))]
pub trait Datum: Copy + Default + Send + 'static {}

/// Element types that can be sent between processes.
#[cfg(feature = "mpi-support")]
pub trait Datum: Copy + Default + Send + 'static + ::mpi::datatype::Equivalence {}

macro_rules! impl_datum {
    ($($T:ty)*) => {$( impl Datum for $T {} )*};
}
impl_datum!{ f64 u64 }

/// The result of a variable-length gather, as seen by the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Gathered<T> {
    /// All contributions, concatenated in rank order.
    pub data: Vec<T>,
    /// Number of elements contributed by each rank.
    pub counts: Vec<usize>,
    /// Offset of each rank's contribution in `data`.
    pub displacements: Vec<usize>,
}

impl<T> Gathered<T> {
    pub fn from_pieces(pieces: Vec<Vec<T>>) -> Self {
        let counts: Vec<_> = pieces.iter().map(|p| p.len()).collect();
        let displacements = displacements(&counts);
        let data = pieces.into_iter().flatten().collect();
        Gathered { data, counts, displacements }
    }

    /// The contribution of a single rank.
    pub fn piece(&self, rank: Rank) -> &[T] {
        let start = self.displacements[rank];
        &self.data[start..start + self.counts[rank]]
    }
}

/// Exclusive prefix sum of `counts`.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts.iter()
        .scan(0, |acc, &count| {
            let start = *acc;
            *acc += count;
            Some(start)
        })
        .collect()
}

pub trait Communicator {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Send a message.  May block until it is received.
    fn send<T: Datum>(&self, dest: Rank, tag: MessageTag, data: &[T]) -> FailResult<()>;

    /// Receive the oldest message from `source` with the given tag.
    fn receive<T: Datum>(&self, source: Rank, tag: MessageTag) -> FailResult<Vec<T>>;

    /// Bring down every process in the universe.
    ///
    /// Used when a process hits a fatal error, so that its peers do not wait forever
    /// on messages that will never come.
    fn abort(&self);

    /// Variable-length gather.  The root receives `Some`, everyone else `None`.
    fn gather_varcount<T: Datum>(&self, root: Rank, data: &[T]) -> FailResult<Option<Gathered<T>>> {
        if self.rank() != root {
            self.send(root, reserved::GATHER, data)?;
            return Ok(None);
        }

        let mut pieces = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            match source == root {
                true => pieces.push(data.to_vec()),
                false => pieces.push(self.receive(source, reserved::GATHER)?),
            }
        }
        Ok(Some(Gathered::from_pieces(pieces)))
    }

    /// Broadcast a vector of any length from the root.
    ///
    /// `data` is ignored on non-root processes, and must be `Some` on the root.
    fn broadcast<T: Datum>(&self, root: Rank, data: Option<Vec<T>>) -> FailResult<Vec<T>> {
        if self.rank() == root {
            let data = match data {
                Some(data) => data,
                None => panic!("root did not provide value to broadcast"),
            };
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.send(dest, reserved::BROADCAST, &data)?;
            }
            Ok(data)
        } else {
            self.receive(root, reserved::BROADCAST)
        }
    }

    /// Every process receives every process's value, in rank order.
    fn all_gather<T: Datum>(&self, value: T) -> FailResult<Vec<T>> {
        let gathered = self.gather_varcount(0, &[value])?;
        let out = self.broadcast(0, gathered.map(|g| g.data))?;
        if out.len() != self.size() {
            throw!(NebError::MalformedMessage {
                source: 0,
                what: format!("all_gather produced {} values for {} ranks", out.len(), self.size()),
            });
        }
        Ok(out)
    }

    /// Sum over all processes.
    ///
    /// Values are summed in rank order, so every process gets a bitwise identical result.
    fn all_sum(&self, value: f64) -> FailResult<f64>
    { Ok(self.all_gather(value)?.into_iter().sum()) }

    fn all_max(&self, value: f64) -> FailResult<f64>
    { Ok(self.all_gather(value)?.into_iter().fold(::std::f64::NEG_INFINITY, f64::max)) }
}

/// The two communication scopes a NEB process participates in.
#[derive(Debug)]
pub struct ReplicaComms<C> {
    /// All processes of all replicas.
    pub world: C,
    /// The processes cooperating on this process's replica.
    pub replica: C,
}

impl<C: Communicator> ReplicaComms<C> {
    pub fn abort(&self) { self.world.abort() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacements_are_exclusive_prefix_sums() {
        assert_eq!(displacements(&[]), Vec::<usize>::new());
        assert_eq!(displacements(&[3, 0, 2, 5]), vec![0, 3, 3, 5]);
    }

    #[test]
    fn gathered_pieces() {
        let g = Gathered::from_pieces(vec![vec![1u64, 2], vec![], vec![3, 4, 5]]);
        assert_eq!(g.counts, vec![2, 0, 3]);
        assert_eq!(g.displacements, vec![0, 2, 2]);
        assert_eq!(g.piece(0), &[1, 2]);
        assert_eq!(g.piece(1), &[] as &[u64]);
        assert_eq!(g.piece(2), &[3, 4, 5]);
    }
}
