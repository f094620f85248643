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

//! A purely repulsive cosine pair potential.
//!
//! For a pair at distance `r < rc`:
//!
//! ```text
//! E(r) = A (1 + cos(pi r / rc))
//! F(r) = A (pi / rc) sin(pi r / rc)      (along the separation, repulsive)
//! ```
//!
//! `A` may be ramped linearly between a start and a stop value over the course of
//! a run; a minimization evaluates it at the end of the ramp.

use crate::{FailResult, V3};

use rayon::prelude::*;
use rayon_cond::CondIterator;
use std::f64::consts::PI;

/// Pairs closer than this (squared) are skipped, as coincident atoms have no direction.
pub const EPSILON: f64 = 1e-20;

/// Rule for cutoffs of unspecified cross-type pairs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MixRule {
    Geometric,
    Arithmetic,
}

impl Default for MixRule {
    fn default() -> Self { MixRule::Geometric }
}

impl MixRule {
    pub fn mix_distance(self, a: f64, b: f64) -> f64 {
        match self {
            MixRule::Geometric => f64::sqrt(a * b),
            MixRule::Arithmetic => 0.5 * (a + b),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PairCoeff {
    /// Prefactor at the start of the ramp.
    pub start: f64,
    /// Prefactor at the end of the ramp.
    pub stop: f64,
    pub cutoff: f64,
}

impl PairCoeff {
    pub fn prefactor_at(&self, fraction: f64) -> f64 {
        self.start + fraction * (self.stop - self.start)
    }
}

/// Pair coefficients as they are being specified, before mixing.
#[derive(Debug, Clone)]
pub struct Builder {
    ntypes: usize,
    cutoff: f64,
    mix: MixRule,
    // [i * ntypes + j], only for i <= j
    explicit: Vec<Option<PairCoeff>>,
}

impl Builder {
    /// `cutoff` is the default for pairs specified without one.
    pub fn new(ntypes: usize, cutoff: f64, mix: MixRule) -> FailResult<Self> {
        ensure!(ntypes > 0, "soft potential needs at least one atom type");
        ensure!(cutoff > 0.0 && cutoff.is_finite(), "invalid global cutoff {}", cutoff);
        Ok(Builder { ntypes, cutoff, mix, explicit: vec![None; ntypes * ntypes] })
    }

    pub fn ntypes(&self) -> usize { self.ntypes }

    /// Specify a pair.  Types are zero-based; order does not matter.
    pub fn set_coeff(&mut self, i: usize, j: usize, start: f64, stop: f64, cutoff: Option<f64>) -> FailResult<&mut Self> {
        ensure!(
            i < self.ntypes && j < self.ntypes,
            "atom type pair ({}, {}) out of range for {} types", i, j, self.ntypes,
        );
        let cutoff = cutoff.unwrap_or(self.cutoff);
        ensure!(cutoff > 0.0 && cutoff.is_finite(), "invalid cutoff {} for pair ({}, {})", cutoff, i, j);

        let (i, j) = (i.min(j), i.max(j));
        self.explicit[i * self.ntypes + j] = Some(PairCoeff { start, stop, cutoff });
        Ok(self)
    }

    /// Fill in cross terms and produce the evaluation table.
    ///
    /// Unspecified cross terms take the geometric mean of the prefactors and the
    /// mixed cutoff.  Every like-type pair must have been given.
    pub fn build(&self) -> FailResult<Soft> {
        let n = self.ntypes;
        let get = |i: usize, j: usize| self.explicit[i.min(j) * n + i.max(j)];

        let mut coeffs = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let coeff = match get(i, j) {
                    Some(coeff) => coeff,
                    None => match (get(i, i), get(j, j)) {
                        (Some(ii), Some(jj)) => PairCoeff {
                            start: f64::sqrt(ii.start * jj.start),
                            stop: f64::sqrt(ii.stop * jj.stop),
                            cutoff: self.mix.mix_distance(ii.cutoff, jj.cutoff),
                        },
                        _ => bail!("All pair coeffs are not set (pair {} {} needs both like-type pairs)", i, j),
                    },
                };
                coeffs.push(coeff);
            }
        }

        let max_cutoff = coeffs.iter().map(|c| c.cutoff).fold(0.0, f64::max);
        trace!("soft potential: {} types, max cutoff {}", n, max_cutoff);
        Ok(Soft { ntypes: n, coeffs, max_cutoff })
    }
}

/// One atom as seen by the pair kernel.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Site {
    /// Identity.  Sites with equal ids never interact.
    pub id: u64,
    /// Zero-based atom type.
    pub ty: usize,
    pub x: V3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    /// One per target.
    pub forces: Vec<V3>,
    /// Energy attributed to the targets: half of every pair they take part in.
    pub energy: f64,
}

/// The complete pair table.
#[derive(Debug, Clone)]
pub struct Soft {
    ntypes: usize,
    coeffs: Vec<PairCoeff>,
    max_cutoff: f64,
}

impl Soft {
    pub fn ntypes(&self) -> usize { self.ntypes }

    pub fn max_cutoff(&self) -> f64 { self.max_cutoff }

    pub fn coeff(&self, i: usize, j: usize) -> &PairCoeff { &self.coeffs[i * self.ntypes + j] }

    pub fn prefactor_at(&self, i: usize, j: usize, fraction: f64) -> f64 {
        self.coeff(i, j).prefactor_at(fraction)
    }

    /// Energy of one pair, and the force magnitude divided by `r`.
    ///
    /// Multiply the second value by the separation vector `x_i - x_j` to get the
    /// force on `i`.
    pub fn single(&self, itype: usize, jtype: usize, rsq: f64, fraction: f64) -> (f64, f64) {
        let coeff = self.coeff(itype, jtype);
        if rsq >= coeff.cutoff * coeff.cutoff || rsq <= EPSILON {
            return (0.0, 0.0);
        }
        let prefactor = coeff.prefactor_at(fraction);
        let r = rsq.sqrt();
        let arg = PI * r / coeff.cutoff;
        let energy = prefactor * (1.0 + arg.cos());
        let fpair = prefactor * arg.sin() * PI / coeff.cutoff / r;
        (energy, fpair)
    }

    /// Forces on each target from every source within range.
    ///
    /// `minimum_image` maps a separation to its nearest periodic image.
    pub fn compute(
        &self,
        fraction: f64,
        targets: &[Site],
        sources: &[Site],
        minimum_image: impl Fn(V3) -> V3 + Sync,
        use_rayon: bool,
    ) -> Output {
        let per_target: Vec<(V3, f64)> = {
            CondIterator::new(0..targets.len(), use_rayon)
                .map(|t| {
                    let target = targets[t];
                    let mut force = [0.0; 3];
                    let mut energy = 0.0;
                    for source in sources {
                        if source.id == target.id {
                            continue;
                        }
                        let d = [
                            target.x[0] - source.x[0],
                            target.x[1] - source.x[1],
                            target.x[2] - source.x[2],
                        ];
                        let d = minimum_image(d);
                        let rsq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                        let (e, fpair) = self.single(target.ty, source.ty, rsq, fraction);
                        for k in 0..3 {
                            force[k] += d[k] * fpair;
                        }
                        energy += 0.5 * e;
                    }
                    (force, energy)
                })
                .collect()
        };

        let energy = per_target.iter().map(|&(_, e)| e).sum();
        let forces = per_target.into_iter().map(|(f, _)| f).collect();
        Output { forces, energy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, StdRng};

    fn two_types() -> Soft {
        let mut builder = Builder::new(2, 1.0, MixRule::Geometric).unwrap();
        builder
            .set_coeff(0, 0, 0.0, 4.0, None).unwrap()
            .set_coeff(1, 1, 0.0, 9.0, Some(2.25)).unwrap();
        builder.build().unwrap()
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{} != {} (tol {})", a, b, tol);
    }

    #[test]
    fn mixing() {
        let soft = two_types();
        assert_eq!(soft.coeff(0, 1), soft.coeff(1, 0));
        assert_close(soft.coeff(0, 1).stop, 6.0, 1e-12);
        assert_close(soft.coeff(0, 1).cutoff, 1.5, 1e-12);
        assert_close(soft.max_cutoff(), 2.25, 1e-12);

        let mut builder = Builder::new(2, 1.0, MixRule::Arithmetic).unwrap();
        builder
            .set_coeff(0, 0, 1.0, 1.0, None).unwrap()
            .set_coeff(1, 1, 1.0, 1.0, Some(2.0)).unwrap();
        assert_close(builder.build().unwrap().coeff(1, 0).cutoff, 1.5, 1e-12);
    }

    #[test]
    fn explicit_cross_term_wins() {
        let mut builder = Builder::new(2, 1.0, MixRule::Geometric).unwrap();
        builder
            .set_coeff(0, 0, 1.0, 1.0, None).unwrap()
            .set_coeff(1, 1, 1.0, 1.0, None).unwrap()
            .set_coeff(1, 0, 3.0, 5.0, Some(0.5)).unwrap();
        let soft = builder.build().unwrap();
        assert_eq!(soft.coeff(0, 1), &PairCoeff { start: 3.0, stop: 5.0, cutoff: 0.5 });
    }

    #[test]
    fn unset_like_pair_is_an_error() {
        let mut builder = Builder::new(2, 1.0, MixRule::Geometric).unwrap();
        builder.set_coeff(0, 0, 1.0, 1.0, None).unwrap();
        assert!(builder.build().is_err());
        assert!(builder.set_coeff(0, 2, 1.0, 1.0, None).is_err());
        assert!(Builder::new(1, -1.0, MixRule::Geometric).is_err());
    }

    #[test]
    fn single_pair() {
        let soft = two_types();
        // full strength at contact, half way along the ramp
        let (e, _) = soft.single(0, 0, 1e-6, 0.5);
        assert_close(e, 4.0, 1e-4);
        // half of the cutoff
        let (e, fpair) = soft.single(0, 0, 0.25, 1.0);
        assert_close(e, 4.0, 1e-12);
        assert_close(fpair * 0.5, 4.0 * PI, 1e-12);
        // outside, and coincident
        assert_eq!(soft.single(0, 0, 1.0, 1.0), (0.0, 0.0));
        assert_eq!(soft.single(0, 0, 0.0, 1.0), (0.0, 0.0));
    }

    #[test]
    fn forces_are_gradient_of_energy() {
        let soft = two_types();
        let mut rng: StdRng = SeedableRng::from_seed(&[3usize][..]);
        let sites: Vec<Site> = {
            (0..12u64)
                .map(|id| Site {
                    id,
                    ty: (id % 2) as usize,
                    x: [rng.gen_range(0.0, 2.5), rng.gen_range(0.0, 2.5), rng.gen_range(0.0, 2.5)],
                })
                .collect()
        };
        let energy_of = |sites: &[Site]| soft.compute(1.0, sites, sites, |d| d, false).energy;

        let out = soft.compute(1.0, &sites, &sites, |d| d, true);
        let h = 1e-6;
        for i in 0..sites.len() {
            for k in 0..3 {
                let mut plus = sites.clone();
                let mut minus = sites.clone();
                plus[i].x[k] += h;
                minus[i].x[k] -= h;
                let numerical = -(energy_of(&plus) - energy_of(&minus)) / (2.0 * h);
                assert_close(out.forces[i][k], numerical, 1e-5 * (1.0 + numerical.abs()));
            }
        }
    }

    #[test]
    fn partial_targets_sum_to_total() {
        let soft = two_types();
        let sites: Vec<Site> = {
            (0..6u64)
                .map(|id| Site { id, ty: 0, x: [0.3 * id as f64, 0.1 * (id % 2) as f64, 0.0] })
                .collect()
        };
        let total = soft.compute(1.0, &sites, &sites, |d| d, false);
        let left = soft.compute(1.0, &sites[..2], &sites, |d| d, false);
        let right = soft.compute(1.0, &sites[2..], &sites, |d| d, false);
        assert_close(left.energy + right.energy, total.energy, 1e-12);
        assert_eq!(&total.forces[2..], &right.forces[..]);

        let net = total.forces.iter().fold([0.0; 3], |acc, f| [acc[0] + f[0], acc[1] + f[1], acc[2] + f[2]]);
        for k in 0..3 {
            assert_close(net[k], 0.0, 1e-12);
        }
    }

    #[test]
    fn periodic_image() {
        let mut builder = Builder::new(1, 1.0, MixRule::Geometric).unwrap();
        builder.set_coeff(0, 0, 1.0, 1.0, None).unwrap();
        let soft = builder.build().unwrap();
        let sites = [
            Site { id: 1, ty: 0, x: [0.1, 0.0, 0.0] },
            Site { id: 2, ty: 0, x: [9.6, 0.0, 0.0] },
        ];
        let wrap = |d: V3| [d[0] - 10.0 * (d[0] / 10.0).round(), d[1], d[2]];
        let out = soft.compute(1.0, &sites, &sites, wrap, false);
        // 0.5 apart through the boundary
        assert_close(out.energy, 1.0, 1e-12);
        assert!(out.forces[0][0] > 0.0);
        assert!(out.forces[1][0] < 0.0);
    }
}
