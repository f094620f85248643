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
use crate::comm::{Communicator, ReplicaComms};
use crate::topology::ReplicaTopology;
use crate::tangent::PathStats;

use std::fmt;

/// The state of the whole chain, as known to every process.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-support", serde(rename_all = "kebab-case"))]
pub struct PathReport {
    /// Per replica.
    pub energy: Vec<f64>,
    pub plen: Vec<f64>,
    pub nlen: Vec<f64>,
    pub gradvnorm: Vec<f64>,
    /// Cumulative distance along the path, normalized to end at 1.
    pub reaction_coordinate: Vec<f64>,
    /// Highest energy minus the energy of the first replica.
    pub forward_barrier: f64,
    /// Highest energy minus the energy of the last replica.
    pub reverse_barrier: f64,
    /// Index of the highest energy replica.
    pub highest_replica: usize,
}

impl PathReport {
    /// # MPI
    ///
    /// Collective over `comms.world`.  Every process must pass the stats of its own
    /// replica; only those of replica roots are used.
    pub fn gather<C: Communicator>(
        comms: &ReplicaComms<C>,
        topo: &ReplicaTopology,
        stats: &PathStats,
    ) -> FailResult<Self> {
        let mut columns = vec![];
        for &value in &[stats.energy, stats.plen, stats.nlen, stats.gradvnorm, stats.fdot] {
            let all = comms.world.all_gather(value)?;
            columns.push((0..topo.nreplica).map(|r| all[topo.root_of(r)]).collect::<Vec<_>>());
        }

        let per_replica = {
            (0..topo.nreplica)
                .map(|r| PathStats {
                    energy: columns[0][r],
                    plen: columns[1][r],
                    nlen: columns[2][r],
                    gradvnorm: columns[3][r],
                    fdot: columns[4][r],
                })
                .collect::<Vec<_>>()
        };
        Ok(PathReport::from_stats(&per_replica))
    }

    /// Build a report from the stats of every replica, in chain order.
    pub fn from_stats(stats: &[PathStats]) -> Self {
        assert!(!stats.is_empty(), "empty chain");

        let energy: Vec<f64> = stats.iter().map(|s| s.energy).collect();
        let plen: Vec<f64> = stats.iter().map(|s| s.plen).collect();
        let nlen = stats.iter().map(|s| s.nlen).collect();
        let gradvnorm = stats.iter().map(|s| s.gradvnorm).collect();

        let mut reaction_coordinate: Vec<f64> = {
            plen.iter()
                .scan(0.0, |acc, &d| {
                    *acc += d;
                    Some(*acc)
                })
                .collect()
        };
        let total = reaction_coordinate[reaction_coordinate.len() - 1];
        if total > 0.0 {
            for r in &mut reaction_coordinate {
                *r /= total;
            }
        }

        let highest_replica = {
            (0..energy.len())
                .fold(0, |best, i| if energy[i] > energy[best] { i } else { best })
        };
        let emax = energy[highest_replica];

        PathReport {
            forward_barrier: emax - energy[0],
            reverse_barrier: emax - energy[energy.len() - 1],
            highest_replica,
            energy,
            plen,
            nlen,
            gradvnorm,
            reaction_coordinate,
        }
    }

    pub fn nreplica(&self) -> usize { self.energy.len() }
}

impl fmt::Display for PathReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>7} {:>10} {:>16} {:>14}", "replica", "coord", "energy", "gradvnorm")?;
        for i in 0..self.nreplica() {
            let marker = if i == self.highest_replica { "*" } else { "" };
            writeln!(
                f, "{:>7} {:>10.6} {:>16.8} {:>14.6e}{}",
                i, self.reaction_coordinate[i], self.energy[i], self.gradvnorm[i], marker,
            )?;
        }
        write!(f, "EBF = {:.8}  EBR = {:.8}", self.forward_barrier, self.reverse_barrier)
    }
}
