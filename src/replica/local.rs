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

//! An in-process universe, where each "process" is a thread.
//!
//! This is what runs the chain when MPI is not available, and what the tests use to
//! build arbitrary replica layouts deterministically.

use crate::FailResult;
use crate::errors::NebError;
use crate::comm::{Communicator, Datum, MessageTag, Rank, ReplicaComms};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

/// Shared by every communicator of a universe.  Nothing is ever sent on the
/// channel; aborting drops the only sender, which wakes every receiver at once.
struct AbortSignal {
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl AbortSignal {
    fn new() -> Arc<Self> {
        let (trigger, listener) = unbounded();
        Arc::new(AbortSignal { trigger: Mutex::new(Some(trigger)), listener })
    }

    fn fire(&self) {
        let mut trigger = match self.trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        trigger.take();
    }
}

struct Envelope {
    source: Rank,
    tag: MessageTag,
    payload: Box<dyn Any + Send>,
}

/// A communicator whose processes are threads of the current process.
///
/// Messages between a pair of ranks with the same tag are received in the order
/// they were sent.  Sends never block.
pub struct LocalComm {
    rank: Rank,
    // `None` at our own rank; messages to self go straight to the stash.
    outboxes: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    // Messages that arrived before anybody asked for them.
    stash: RefCell<VecDeque<Envelope>>,
    abort: Arc<AbortSignal>,
}

impl ::std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.outboxes.len())
            .finish()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank { self.rank }

    fn size(&self) -> usize { self.outboxes.len() }

    fn send<T: Datum>(&self, dest: Rank, tag: MessageTag, data: &[T]) -> FailResult<()> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: Box::new(data.to_vec()),
        };
        match &self.outboxes[dest] {
            None => self.stash.borrow_mut().push_back(envelope),
            Some(outbox) => {
                if outbox.send(envelope).is_err() {
                    throw!(NebError::PeerHungUp(dest));
                }
            },
        }
        Ok(())
    }

    fn receive<T: Datum>(&self, source: Rank, tag: MessageTag) -> FailResult<Vec<T>> {
        loop {
            if let Some(envelope) = self.take_stashed(source, tag) {
                return match envelope.payload.downcast::<Vec<T>>() {
                    Ok(data) => Ok(*data),
                    Err(_) => throw!(NebError::MalformedMessage {
                        source,
                        what: format!("tag {} carried an unexpected element type", tag),
                    }),
                };
            }

            select! {
                recv(self.inbox) -> envelope => match envelope {
                    Ok(envelope) => self.stash.borrow_mut().push_back(envelope),
                    Err(_) => throw!(NebError::PeerHungUp(source)),
                },
                recv(self.abort.listener) -> _ => throw!(NebError::Aborted),
            }
        }
    }

    fn abort(&self) {
        self.abort.fire();
    }
}

impl LocalComm {
    fn take_stashed(&self, source: Rank, tag: MessageTag) -> Option<Envelope> {
        let mut stash = self.stash.borrow_mut();
        let index = stash.iter().position(|e| e.source == source && e.tag == tag)?;
        stash.remove(index)
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        // a panicking thread will never send what its peers are waiting for
        if thread::panicking() {
            self.abort();
        }
    }
}

/// One process of a partitioned local universe.
#[derive(Debug)]
pub struct LocalProcess {
    /// Which replica this process works on.
    pub ireplica: usize,
    pub comms: ReplicaComms<LocalComm>,
}

/// Constructors for local universes.
pub struct LocalUniverse;

impl LocalUniverse {
    /// A single communicator group of the given size.
    pub fn group(size: usize) -> Vec<LocalComm>
    { make_group(size, &AbortSignal::new()) }

    /// A universe of `procs.iter().sum()` processes, where replica `i` runs on
    /// `procs[i]` of them.
    ///
    /// Universe ranks are assigned to replicas in contiguous blocks, in order.
    pub fn partitioned(procs: &[usize]) -> Vec<LocalProcess> {
        let abort = AbortSignal::new();
        let nprocs_universe = procs.iter().sum();

        let world = make_group(nprocs_universe, &abort);
        let replicas = procs.iter().map(|&n| make_group(n, &abort));

        let mut world = world.into_iter();
        let mut out = Vec::with_capacity(nprocs_universe);
        for (ireplica, group) in replicas.enumerate() {
            for replica in group {
                let world = match world.next() {
                    Some(world) => world,
                    None => unreachable!(),
                };
                out.push(LocalProcess {
                    ireplica,
                    comms: ReplicaComms { world, replica },
                });
            }
        }
        out
    }

    /// Run a function on every process of a partitioned universe, each on its own thread.
    ///
    /// Outputs are returned in universe rank order.  A panic on any thread aborts the
    /// universe and is resumed on the calling thread.
    pub fn run<R, F>(processes: Vec<LocalProcess>, func: F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalProcess) -> R + Sync,
    {
        let func = &func;
        thread::scope(|scope| {
            let handles: Vec<_> = {
                processes.into_iter()
                    .map(|process| {
                        let name = format!("replica-{}.{}", process.ireplica, process.comms.replica.rank());
                        thread::Builder::new()
                            .name(name)
                            .spawn_scoped(scope, move || func(process))
                    })
                    .collect::<Result<_, _>>()
                    .unwrap_or_else(|e| panic!("failed to spawn process thread: {}", e))
            };

            handles.into_iter()
                .map(|handle| match handle.join() {
                    Ok(out) => out,
                    Err(payload) => ::std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

fn make_group(size: usize, abort: &Arc<AbortSignal>) -> Vec<LocalComm> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

    receivers.into_iter().enumerate()
        .map(|(rank, inbox)| LocalComm {
            rank,
            outboxes: {
                senders.iter().enumerate()
                    .map(|(dest, sender)| match dest == rank {
                        true => None,
                        false => Some(sender.clone()),
                    })
                    .collect()
            },
            inbox,
            stash: RefCell::new(VecDeque::new()),
            abort: abort.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_group<R: Send>(size: usize, func: impl Fn(LocalComm) -> R + Sync) -> Vec<R> {
        let func = &func;
        thread::scope(|scope| {
            let handles: Vec<_> = {
                LocalUniverse::group(size).into_iter()
                    .map(|comm| scope.spawn(move || func(comm)))
                    .collect()
            };
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn point_to_point_is_matched_by_source_and_tag() {
        let out = run_group(3, |comm| {
            match comm.rank() {
                0 => {
                    comm.send(2, 7, &[1.0f64]).unwrap();
                    comm.send(2, 8, &[2.0f64]).unwrap();
                    vec![]
                },
                1 => {
                    comm.send(2, 7, &[3.0f64]).unwrap();
                    vec![]
                },
                _ => {
                    // ask in a different order than things were sent
                    let mut got = comm.receive::<f64>(0, 8).unwrap();
                    got.extend(comm.receive::<f64>(1, 7).unwrap());
                    got.extend(comm.receive::<f64>(0, 7).unwrap());
                    got
                },
            }
        });
        assert_eq!(out[2], vec![2.0, 3.0, 1.0]);
    }

    #[test]
    fn same_tag_is_fifo() {
        let out = run_group(2, |comm| {
            if comm.rank() == 0 {
                for i in 0..5u64 {
                    comm.send(1, 1, &[i]).unwrap();
                }
                vec![]
            } else {
                (0..5).map(|_| comm.receive::<u64>(0, 1).unwrap()[0]).collect()
            }
        });
        assert_eq!(out[1], vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn wrong_element_type_is_malformed() {
        let out = run_group(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 1, &[1u64]).unwrap();
                None
            } else {
                Some(comm.receive::<f64>(0, 1).unwrap_err())
            }
        });
        let err = out[1].as_ref().unwrap();
        match err.downcast_ref::<NebError>() {
            Some(NebError::MalformedMessage { source: 0, .. }) => {},
            e => panic!("unexpected error: {:?}", e),
        }
    }

    #[test]
    fn collectives() {
        let out = run_group(4, |comm| {
            let me = comm.rank();
            let mine: Vec<u64> = (0..me as u64).collect();
            let gathered = comm.gather_varcount(1, &mine).unwrap();
            if me == 1 {
                let g = gathered.as_ref().unwrap();
                assert_eq!(g.counts, vec![0, 1, 2, 3]);
                assert_eq!(g.displacements, vec![0, 0, 1, 3]);
                assert_eq!(g.data, vec![0, 0, 1, 0, 1, 2]);
            } else {
                assert!(gathered.is_none());
            }

            let root_data = match me { 2 => Some(vec![4.0, 5.0]), _ => None };
            assert_eq!(comm.broadcast(2, root_data).unwrap(), vec![4.0, 5.0]);

            assert_eq!(comm.all_gather(me as u64 * 10).unwrap(), vec![0, 10, 20, 30]);
            (comm.all_sum(0.1 * me as f64).unwrap(), comm.all_max(me as f64).unwrap())
        });
        for &(sum, max) in &out {
            // bitwise identical everywhere
            assert_eq!(sum.to_bits(), out[0].0.to_bits());
            assert_eq!(max, 3.0);
        }
    }

    #[test]
    fn abort_wakes_up_blocked_receivers() {
        let out = run_group(3, |comm| {
            if comm.rank() == 0 {
                comm.abort();
                None
            } else {
                Some(comm.receive::<f64>(0, 1).unwrap_err())
            }
        });
        for err in out.into_iter().skip(1) {
            assert_eq!(err.unwrap().downcast_ref::<NebError>(), Some(&NebError::Aborted));
        }
    }

    #[test]
    fn partitioned_layout() {
        let procs = LocalUniverse::partitioned(&[2, 1, 3]);
        let layout: Vec<_> = procs.iter()
            .map(|p| (p.ireplica, p.comms.world.rank(), p.comms.replica.rank(), p.comms.replica.size()))
            .collect();
        assert_eq!(layout, vec![
            (0, 0, 0, 2), (0, 1, 1, 2),
            (1, 2, 0, 1),
            (2, 3, 0, 3), (2, 4, 1, 3), (2, 5, 2, 3),
        ]);
        assert!(procs.iter().all(|p| p.comms.world.size() == 6));
    }

    #[test]
    fn abort_reaches_every_scope_of_the_universe() {
        let out = LocalUniverse::run(LocalUniverse::partitioned(&[2, 1]), |process| {
            match process.ireplica {
                // aborts through the world scope...
                1 => {
                    process.comms.world.abort();
                    None
                },
                // ...while these two wait on each other inside their replica
                _ => {
                    let peer = 1 - process.comms.replica.rank();
                    Some(process.comms.replica.receive::<u64>(peer, 5).unwrap_err())
                },
            }
        });
        assert!(out[2].is_none());
        for err in &out[..2] {
            let err = err.as_ref().unwrap();
            assert_eq!(err.downcast_ref::<NebError>(), Some(&NebError::Aborted));
        }
    }
}
