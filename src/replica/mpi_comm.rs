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

//! MPI backend.
//!
//! Point-to-point messages map directly onto MPI sends and receives.  Gather and
//! broadcast use the native collectives; the remaining collectives are built from
//! those two by the trait's default methods.

use crate::FailResult;
use crate::comm::{self, Communicator, Datum, Gathered, MessageTag, Rank, ReplicaComms};

use ::mpi::datatype::PartitionMut;
use ::mpi::topology::{Color, UserCommunicator};
use ::mpi::traits::{Destination, Root, Source};
// (imported anonymously; the name belongs to our own trait)
use ::mpi::topology::Communicator as _;

/// Wraps an MPI communicator.
pub struct MpiComm<C: ::mpi::topology::Communicator> {
    comm: C,
}

impl<C: ::mpi::topology::Communicator> MpiComm<C> {
    pub fn new(comm: C) -> Self { MpiComm { comm } }
}

/// Split `world` into one communicator per replica.
///
/// Universe ranks are assigned to replicas in contiguous blocks, in order, where
/// replica `i` gets `procs[i]` ranks.  Returns the replica index of this process
/// alongside its communicators.
///
/// # MPI
///
/// This is a collective operation on `world`.
pub fn split_world(
    world: &impl ::mpi::topology::Communicator,
    procs: &[usize],
) -> FailResult<(usize, ReplicaComms<MpiComm<UserCommunicator>>)>
{
    let me = world.rank() as usize;
    let total: usize = procs.iter().sum();
    ensure!(
        total == world.size() as usize,
        "replicas need {} processes in total, but MPI was launched with {}", total, world.size(),
    );

    let ireplica = {
        comm::displacements(procs).iter()
            .zip(procs)
            .position(|(&start, &count)| start <= me && me < start + count)
            .ok_or_else(|| format_err!("rank {} is not assigned to any replica", me))?
    };

    let replica = match world.split_by_color(Color::with_value(ireplica as i32)) {
        Some(replica) => replica,
        None => bail!("MPI_Comm_split gave rank {} no communicator", me),
    };
    let world = world.duplicate();

    Ok((ireplica, ReplicaComms {
        world: MpiComm::new(world),
        replica: MpiComm::new(replica),
    }))
}

impl<C: ::mpi::topology::Communicator> Communicator for MpiComm<C> {
    fn rank(&self) -> Rank { self.comm.rank() as Rank }

    fn size(&self) -> usize { self.comm.size() as usize }

    fn send<T: Datum>(&self, dest: Rank, tag: MessageTag, data: &[T]) -> FailResult<()> {
        self.comm.process_at_rank(dest as i32).send_with_tag(data, tag);
        Ok(())
    }

    fn receive<T: Datum>(&self, source: Rank, tag: MessageTag) -> FailResult<Vec<T>> {
        let (data, _status) = self.comm.process_at_rank(source as i32).receive_vec_with_tag::<T>(tag);
        Ok(data)
    }

    fn abort(&self) {
        self.comm.abort(1)
    }

    fn gather_varcount<T: Datum>(&self, root: Rank, data: &[T]) -> FailResult<Option<Gathered<T>>> {
        let root_process = self.comm.process_at_rank(root as i32);
        let count = data.len() as i32;

        if self.rank() != root {
            root_process.gather_into(&count);
            root_process.gather_varcount_into(data);
            return Ok(None);
        }

        let mut counts = vec![0i32; self.size()];
        root_process.gather_into_root(&count, &mut counts[..]);

        let counts: Vec<usize> = counts.iter().map(|&c| c as usize).collect();
        let displacements = comm::displacements(&counts);
        let total = counts.iter().sum();

        let mut buf = vec![T::default(); total];
        {
            let mpi_counts: Vec<i32> = counts.iter().map(|&c| c as i32).collect();
            let mpi_displs: Vec<i32> = displacements.iter().map(|&d| d as i32).collect();
            let mut partition = PartitionMut::new(&mut buf[..], mpi_counts, &mpi_displs[..]);
            root_process.gather_varcount_into_root(data, &mut partition);
        }

        Ok(Some(Gathered { data: buf, counts, displacements }))
    }

    fn broadcast<T: Datum>(&self, root: Rank, data: Option<Vec<T>>) -> FailResult<Vec<T>> {
        let root_process = self.comm.process_at_rank(root as i32);
        let is_root = self.rank() == root;
        if is_root && data.is_none() {
            panic!("root did not provide value to broadcast");
        }

        let mut buf = data.unwrap_or_default();
        let mut size = buf.len() as u64;
        root_process.broadcast_into(&mut size);

        if !is_root {
            buf.resize(size as usize, T::default());
        }
        root_process.broadcast_into(&mut buf[..]);
        Ok(buf)
    }
}
