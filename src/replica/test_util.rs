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

use crate::{Tag, V3};
use crate::host::{Atoms, Host, MinimumImage};

use rand::{Rng, SeedableRng, StdRng};
use std::collections::HashMap;

/// A chain of replicas whose atoms are scattered over processes at random, with a
/// different owner and a different storage order in every replica.
pub(crate) struct ScatteredPath {
    tags: Vec<Tag>,
    // [replica] -> tag -> position
    positions: Vec<HashMap<Tag, V3>>,
    // [replica][replica rank] -> owned tags, in storage order
    owners: Vec<Vec<Vec<Tag>>>,
    energies: Vec<f64>,
}

pub(crate) fn scattered_path(procs: &[usize], natoms: usize, seed: usize) -> ScatteredPath {
    let mut rng: StdRng = SeedableRng::from_seed(&[seed][..]);

    // sparse tags, so that nothing can accidentally work by index
    let tags: Vec<Tag> = (0..natoms as u64).map(|i| 1000 + 7 * i).collect();
    let nreplica = procs.len();

    let positions: Vec<HashMap<Tag, V3>> = {
        (0..nreplica)
            .map(|ireplica| {
                tags.iter()
                    .map(|&tag| {
                        let base = tag as f64 * 0.01;
                        let x = [
                            base + ireplica as f64,
                            base + rng.gen::<f64>(),
                            rng.gen::<f64>(),
                        ];
                        (tag, x)
                    })
                    .collect()
            })
            .collect()
    };

    let owners: Vec<Vec<Vec<Tag>>> = {
        procs.iter()
            .map(|&nprocs| {
                let mut order = tags.clone();
                rng.shuffle(&mut order);
                let mut owned = vec![vec![]; nprocs];
                for tag in order {
                    owned[rng.gen_range(0, nprocs)].push(tag);
                }
                owned
            })
            .collect()
    };

    // one bump, highest in the middle
    let energies: Vec<f64> = {
        (0..nreplica)
            .map(|i| (::std::f64::consts::PI * i as f64 / (nreplica - 1) as f64).sin())
            .collect()
    };

    ScatteredPath { tags, positions, owners, energies }
}

impl ScatteredPath {
    pub fn natoms(&self) -> usize { self.tags.len() }

    pub fn position(&self, ireplica: usize, tag: Tag) -> V3 { self.positions[ireplica][&tag] }

    pub fn energy(&self, ireplica: usize) -> f64 { self.energies[ireplica] }

    /// The atoms stored by one process, in storage order.
    pub fn owned(&self, ireplica: usize, rank: usize) -> Vec<(Tag, V3)> {
        self.owners[ireplica][rank].iter()
            .map(|&tag| (tag, self.position(ireplica, tag)))
            .collect()
    }
}

/// A host whose replica energy is a constant.
pub(crate) struct MockHost {
    pub atoms: Atoms,
    pub natoms: u64,
    pub energy: f64,
}

impl MockHost {
    pub fn new(owned: Vec<(Tag, V3)>, natoms: u64, energy: f64) -> Self {
        let n = owned.len();
        let (tag, x): (Vec<_>, Vec<_>) = owned.into_iter().unzip();
        // something nonzero and different on every atom
        let f = x.iter().map(|&[a, b, c]| [-a, 0.5 - b, c]).collect();
        MockHost {
            atoms: Atoms { tag, x, f, mask: vec![1; n] },
            natoms,
            energy,
        }
    }
}

impl MinimumImage for MockHost {
    fn minimum_image(&self, d: V3) -> V3 { d }
}

impl Host for MockHost {
    fn atoms(&self) -> &Atoms { &self.atoms }
    fn atoms_mut(&mut self) -> &mut Atoms { &mut self.atoms }
    fn natoms(&self) -> u64 { self.natoms }

    fn has_energy_source(&self, id: &str) -> bool { id == "thermo_pe" }

    fn potential_energy(&self, id: &str) -> Option<f64> {
        match self.has_energy_source(id) {
            true => Some(self.energy),
            false => None,
        }
    }
}
