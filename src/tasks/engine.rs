/* ********************************************************************** **
**  This file is part of rsp2.                                            **
**                                                                        **
**  rsp2 is free software: you can redistribute it and/or modify it under **
**  the terms of the GNU General Public License as published by the Free  **
**  Software Foundation, either version 3 of the License, or (at your     **
**  option) any later version.                                            **
**                                                                        **
**      http://www.gnu.org/licenses/                                      **
**                                                                        **
** Do note that, while the whole of rsp2 is licensed under the GPL, many  **
** parts of it are licensed under more permissive terms.                  **
** ********************************************************************** */

//! The engine that runs one replica on a group of processes.
//!
//! Atoms are distributed over the replica's processes by slabs along x, whose
//! bounds are fixed when the engine is built.  Forces use a replicated-data scheme:
//! each process gathers every atom of the replica and evaluates the pair kernel for
//! the atoms it owns.

use crate::FailResult;

use rsp2_potentials::soft::{Site, Soft};
use rsp2_replica::{Atoms, Communicator, GroupBit, Host, MinimizeHook, MinimumImage, Orthorhombic};
use rsp2_replica::comm::Gathered;

use itertools::Itertools;
use slice_of_array::prelude::*;

type V3 = [f64; 3];

/// Atoms that take part in the NEB path.
pub const NEB_GROUP: GroupBit = GroupBit(1 << 1);
/// Atoms whose forces are always zero.
pub const FROZEN: GroupBit = GroupBit(1 << 2);

/// Name of the energy source published by the engine.
pub const ENERGY_SOURCE: &str = "thermo_pe";

/// One atom of the replica, as known before decomposition.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InitialAtom {
    pub tag: u64,
    pub ty: usize,
    pub x: V3,
    pub mask: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Slabs {
    lo: f64,
    width: f64,
    count: usize,
}

impl Slabs {
    fn new(xs: impl IntoIterator<Item=f64>, count: usize) -> Self {
        let (lo, hi) = xs.into_iter().minmax().into_option().unwrap_or((0.0, 0.0));
        Slabs { lo, width: (hi - lo) / count as f64, count }
    }

    /// Atoms outside of the initial bounds belong to the outermost slabs.
    fn owner(&self, x: &V3) -> usize {
        if !(self.width > 0.0) {
            return 0;
        }
        let slab = ((x[0] - self.lo) / self.width).floor();
        match slab {
            s if !(s >= 0.0) => 0,
            s if s >= (self.count - 1) as f64 => self.count - 1,
            s => s as usize,
        }
    }
}

/// Runs one replica.
pub struct Engine<'a, C: Communicator> {
    /// Replica scope.
    comm: &'a C,
    potential: &'a Soft,
    cell: Orthorhombic,
    use_rayon: bool,
    slabs: Slabs,
    natoms: u64,

    atoms: Atoms,
    // parallel to `atoms`
    types: Vec<usize>,
    v: Vec<V3>,

    energy: Option<f64>,
    nmigrations: u64,
}

/// Mutable views of the per-atom arrays used by the integrator.
pub struct Parts<'e> {
    pub x: &'e mut [V3],
    pub v: &'e mut [V3],
    pub f: &'e [V3],
}

impl<'a, C: Communicator> Engine<'a, C> {
    /// Every process of the replica must pass the same `atoms`; each keeps those in its slab.
    pub fn new(
        comm: &'a C,
        potential: &'a Soft,
        cell: Orthorhombic,
        use_rayon: bool,
        atoms: &[InitialAtom],
    ) -> FailResult<Self> {
        for atom in atoms {
            ensure!(
                atom.ty < potential.ntypes(),
                "atom {} has type {}, but the potential only knows {} types", atom.tag, atom.ty, potential.ntypes(),
            );
        }

        let slabs = Slabs::new(atoms.iter().map(|a| a.x[0]), comm.size());
        let me = comm.rank();
        let mut engine = Engine {
            comm, potential, cell, use_rayon,
            natoms: atoms.len() as u64,
            atoms: Atoms::default(),
            types: vec![],
            v: vec![],
            energy: None,
            nmigrations: 0,
            slabs,
        };
        let owned: Vec<_> = atoms.iter().filter(|a| engine.slabs.owner(&a.x) == me).collect();
        for atom in owned {
            engine.push(atom.tag, atom.ty, atom.mask, atom.x, [0.0; 3]);
        }
        debug!("owns {} of {} atoms", engine.atoms.nlocal(), engine.natoms);
        Ok(engine)
    }

    fn push(&mut self, tag: u64, ty: usize, mask: u32, x: V3, v: V3) {
        self.atoms.tag.push(tag);
        self.atoms.x.push(x);
        self.atoms.f.push([0.0; 3]);
        self.atoms.mask.push(mask);
        self.types.push(ty);
        self.v.push(v);
    }

    pub fn comm(&self) -> &'a C { self.comm }

    pub fn nlocal(&self) -> usize { self.atoms.nlocal() }

    pub fn velocities(&self) -> &[V3] { &self.v }

    /// Number of completed `migrate` calls.
    pub fn nmigrations(&self) -> u64 { self.nmigrations }

    pub fn parts_mut(&mut self) -> Parts<'_> {
        Parts {
            x: &mut self.atoms.x,
            v: &mut self.v,
            f: &self.atoms.f,
        }
    }

    /// Hand atoms that left this process's slab to their new owners.
    ///
    /// Atoms that stay keep their relative order; arrivals are appended.
    ///
    /// # MPI
    ///
    /// Collective over the replica.
    pub fn migrate(&mut self) -> FailResult<()> {
        let me = self.comm.rank();
        let leaving: Vec<usize> = {
            (0..self.nlocal())
                .filter(|&i| self.slabs.owner(&self.atoms.x[i]) != me)
                .collect()
        };

        let mut ints: Vec<u64> = Vec::with_capacity(3 * leaving.len());
        let mut reals: Vec<[f64; 6]> = Vec::with_capacity(leaving.len());
        for &i in &leaving {
            ints.extend_from_slice(&[self.atoms.tag[i], self.types[i] as u64, self.atoms.mask[i] as u64]);
            let (x, v) = (self.atoms.x[i], self.v[i]);
            reals.push([x[0], x[1], x[2], v[0], v[1], v[2]]);
        }
        self.retain(|i| !leaving.contains(&i));

        let ints = all_gather_varcount(self.comm, &ints)?;
        let reals = all_gather_varcount(self.comm, reals.flat())?;
        ensure!(
            ints.len() % 3 == 0 && reals.len() % 6 == 0 && ints.len() / 3 == reals.len() / 6,
            "migration lists are inconsistent ({} integers, {} reals)", ints.len(), reals.len(),
        );

        for (int, real) in ints.nest::<[_; 3]>().iter().zip(reals.nest::<[_; 6]>()) {
            let x = [real[0], real[1], real[2]];
            if self.slabs.owner(&x) == me {
                self.push(int[0], int[1] as usize, int[2] as u32, x, [real[3], real[4], real[5]]);
            }
        }
        self.nmigrations += 1;

        let total = self.comm.all_sum(self.nlocal() as f64)?;
        ensure!(total as u64 == self.natoms, "migration lost atoms ({} of {} remain)", total, self.natoms);
        trace!("migrate: {} left, {} now owned", leaving.len(), self.nlocal());
        Ok(())
    }

    fn retain(&mut self, keep: impl Fn(usize) -> bool) {
        let kept: Vec<usize> = (0..self.nlocal()).filter(|&i| keep(i)).collect();
        let atoms = &mut self.atoms;
        atoms.tag = kept.iter().map(|&i| atoms.tag[i]).collect();
        atoms.x = kept.iter().map(|&i| atoms.x[i]).collect();
        atoms.f = kept.iter().map(|&i| atoms.f[i]).collect();
        atoms.mask = kept.iter().map(|&i| atoms.mask[i]).collect();
        self.types = kept.iter().map(|&i| self.types[i]).collect();
        self.v = kept.iter().map(|&i| self.v[i]).collect();
    }

    /// Evaluate forces on owned atoms and the replica's potential energy.
    ///
    /// # MPI
    ///
    /// Collective over the replica.
    pub fn compute_forces(&mut self) -> FailResult<()> {
        let targets: Vec<Site> = {
            (0..self.nlocal())
                .map(|i| Site { id: self.atoms.tag[i], ty: self.types[i], x: self.atoms.x[i] })
                .collect()
        };

        let ids: Vec<u64> = targets.iter().flat_map(|s| vec![s.id, s.ty as u64]).collect();
        let ids = all_gather_varcount(self.comm, &ids)?;
        let xs = all_gather_varcount(self.comm, self.atoms.x.flat())?;
        ensure!(
            ids.len() == 2 * self.natoms as usize && xs.len() == 3 * self.natoms as usize,
            "replica reported {} atoms during force evaluation, expected {}", ids.len() / 2, self.natoms,
        );
        let sources: Vec<Site> = {
            ids.nest::<[_; 2]>().iter().zip(xs.nest::<V3>())
                .map(|(&[id, ty], &x)| Site { id, ty: ty as usize, x })
                .collect()
        };

        let cell = self.cell;
        let out = self.potential.compute(1.0, &targets, &sources, |d| cell.minimum_image(d), self.use_rayon);
        self.atoms.f = out.forces;
        self.energy = Some(self.comm.all_sum(out.energy)?);
        Ok(())
    }
}

/// Every process receives the concatenation of everyone's `data`, in rank order.
fn all_gather_varcount<C: Communicator, T: rsp2_replica::comm::Datum>(comm: &C, data: &[T]) -> FailResult<Vec<T>> {
    let gathered: Option<Gathered<T>> = comm.gather_varcount(0, data)?;
    comm.broadcast(0, gathered.map(|g| g.data))
}

impl<'a, C: Communicator> MinimumImage for Engine<'a, C> {
    fn minimum_image(&self, d: V3) -> V3 { self.cell.minimum_image(d) }
}

impl<'a, C: Communicator> Host for Engine<'a, C> {
    fn atoms(&self) -> &Atoms { &self.atoms }
    fn atoms_mut(&mut self) -> &mut Atoms { &mut self.atoms }
    fn natoms(&self) -> u64 { self.natoms }

    fn has_energy_source(&self, id: &str) -> bool { id == ENERGY_SOURCE }

    fn potential_energy(&self, id: &str) -> Option<f64> {
        match self.has_energy_source(id) {
            true => self.energy,
            false => None,
        }
    }
}

/// Zeroes the forces on a group after every force evaluation.
#[derive(Debug, Clone)]
pub struct SetForceZero {
    group: GroupBit,
}

impl SetForceZero {
    pub fn new(group: GroupBit) -> Self { SetForceZero { group } }
}

impl<H: Host + ?Sized> MinimizeHook<H> for SetForceZero {
    fn name(&self) -> &str { "setforce" }

    fn on_post_force(&mut self, host: &mut H) -> FailResult<()> {
        let atoms = host.atoms_mut();
        for i in atoms.group_indices(self.group) {
            atoms.f[i] = [0.0; 3];
        }
        Ok(())
    }
}
