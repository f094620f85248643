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

//! What the NEB fix needs from the engine that runs a replica.

use crate::{Tag, V3};

/// Per-atom arrays for the atoms owned by this process.
///
/// All vectors have the same length.  The order of atoms is arbitrary and may
/// change between any two calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Atoms {
    pub tag: Vec<Tag>,
    pub x: Vec<V3>,
    pub f: Vec<V3>,
    /// Group membership bits.
    pub mask: Vec<u32>,
}

impl Atoms {
    pub fn nlocal(&self) -> usize { self.tag.len() }

    pub fn in_group(&self, i: usize, group: GroupBit) -> bool
    { self.mask[i] & group.0 != 0 }

    /// Local indices of the atoms in a group.
    pub fn group_indices(&self, group: GroupBit) -> Vec<usize>
    { (0..self.nlocal()).filter(|&i| self.in_group(i, group)).collect() }
}

/// A single bit of [`Atoms::mask`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GroupBit(pub u32);

impl GroupBit {
    /// Every atom belongs to this group.
    pub const ALL: GroupBit = GroupBit(1);
}

impl Default for GroupBit {
    fn default() -> Self { GroupBit::ALL }
}

/// Reduces a displacement between two atoms to its shortest periodic image.
pub trait MinimumImage {
    fn minimum_image(&self, d: V3) -> V3;
}

/// No periodic boundaries.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct NonPeriodic;

impl MinimumImage for NonPeriodic {
    fn minimum_image(&self, d: V3) -> V3 { d }
}

/// An axis-aligned box, periodic along the axes that have a period.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Orthorhombic {
    pub periods: [Option<f64>; 3],
}

impl MinimumImage for Orthorhombic {
    fn minimum_image(&self, mut d: V3) -> V3 {
        for k in 0..3 {
            if let Some(period) = self.periods[k] {
                d[k] -= period * (d[k] / period).round();
            }
        }
        d
    }
}

/// The engine of a single replica, as seen from one of its processes.
pub trait Host: MinimumImage {
    fn atoms(&self) -> &Atoms;

    fn atoms_mut(&mut self) -> &mut Atoms;

    /// Number of atoms in the replica, summed over all of its processes.
    fn natoms(&self) -> u64;

    fn has_energy_source(&self, id: &str) -> bool;

    /// The replica's potential energy from the most recent force evaluation.
    ///
    /// Every process of a replica reports the same value.
    fn potential_energy(&self, id: &str) -> Option<f64>;
}
