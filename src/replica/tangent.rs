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

//! Path tangent and NEB force.
//!
//! The tangent is a single unit vector in the `3 * nebatoms` dimensional space of the
//! whole replica, so every norm and dot product here is reduced over the replica scope.
//!
//! The interior tangent is the energy-weighted one of Henkelman and Jónsson
//! (J. Chem. Phys. 113, 9978 (2000)), which avoids kinks in regions where the force
//! parallel to the path is large compared to the perpendicular force.

use crate::{FailResult, V3};
use crate::comm::Communicator;
use crate::host::{Host, MinimumImage};
use crate::topology::ImageRole;
use crate::math::{add, dot, scale, sqnorm, sub};

/// This replica's energy and those of its neighbors.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Energies {
    pub this: f64,
    pub prev: Option<f64>,
    pub next: Option<f64>,
}

/// What happens to the forces on the two end replicas.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointMode {
    /// Forces on NEB atoms are zeroed, so the end states never move.
    Fixed,
    /// The true force is left alone, so the end states relax into their minima.
    Free,
}

impl Default for EndpointMode {
    fn default() -> Self { EndpointMode::Fixed }
}

/// Parameters of the force rewrite.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MixParams {
    pub kspring: f64,
    /// Is this replica the climbing image?
    pub climbing: bool,
    pub endpoints: EndpointMode,
}

/// Replica-wide segment lengths, output by [`compute_tangent`].
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Segments {
    /// Distance to the previous image.  Zero on the first replica.
    pub plen: f64,
    /// Distance to the next image.  Zero on the last replica.
    pub nlen: f64,
    /// Norm of the tangent before normalization.
    pub tlen: f64,
}

/// Diagnostics from one force rewrite.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct PathStats {
    pub energy: f64,
    pub plen: f64,
    pub nlen: f64,
    /// Norm of the true force perpendicular to the tangent.
    pub gradvnorm: f64,
    /// Projection of the true force onto the tangent.
    pub fdot: f64,
}

/// Compute the unit tangent for every NEB atom.
///
/// `neb` lists the local indices of NEB atoms.  `xprev` is not read on the first
/// replica, nor `xnext` on the last.  Other entries of `tangent` are left untouched.
///
/// # MPI
///
/// Collective over `replica`.
pub fn compute_tangent<C: Communicator>(
    replica: &C,
    role: ImageRole,
    energies: &Energies,
    image: &(impl MinimumImage + ?Sized),
    neb: &[usize],
    x: &[V3],
    xprev: &[V3],
    xnext: &[V3],
    tangent: &mut [V3],
) -> FailResult<Segments> {
    let rule = TangentRule::choose(role, energies)?;

    let (mut psq, mut nsq, mut tsq) = (0.0, 0.0, 0.0);
    for &i in neb {
        // both point forward along the path
        let dprev = match role {
            ImageRole::First => [0.0; 3],
            _ => image.minimum_image(sub(x[i], xprev[i])),
        };
        let dnext = match role {
            ImageRole::Last => [0.0; 3],
            _ => image.minimum_image(sub(xnext[i], x[i])),
        };
        psq += sqnorm(dprev);
        nsq += sqnorm(dnext);

        let t = rule.apply(dprev, dnext);
        tsq += sqnorm(t);
        tangent[i] = t;
    }

    let segments = Segments {
        plen: replica.all_sum(psq)?.sqrt(),
        nlen: replica.all_sum(nsq)?.sqrt(),
        tlen: replica.all_sum(tsq)?.sqrt(),
    };

    if segments.tlen > 0.0 {
        let inv = 1.0 / segments.tlen;
        for &i in neb {
            tangent[i] = scale(inv, tangent[i]);
        }
    }
    Ok(segments)
}

/// Rewrite the forces on NEB atoms, given the unit tangent.
///
/// # MPI
///
/// Collective over `replica`.
pub fn adjust_force<C: Communicator>(
    replica: &C,
    role: ImageRole,
    params: &MixParams,
    energies: &Energies,
    segments: &Segments,
    neb: &[usize],
    tangent: &[V3],
    f: &mut [V3],
) -> FailResult<PathStats> {
    let fdot = replica.all_sum(neb.iter().map(|&i| dot(f[i], tangent[i])).sum())?;

    let mut perp_sq = 0.0;
    for &i in neb {
        perp_sq += sqnorm(perpendicular(f[i], fdot, tangent[i]));
    }
    let gradvnorm = replica.all_sum(perp_sq)?.sqrt();

    let parallel = match (role, params.endpoints) {
        (ImageRole::Interior, _) => match params.climbing {
            true => Some(-fdot),
            false => Some(params.kspring * (segments.nlen - segments.plen)),
        },
        (_, EndpointMode::Free) => None,
        (_, EndpointMode::Fixed) => Some(0.0),
    };

    match parallel {
        None => {},
        Some(_) if role != ImageRole::Interior => {
            for &i in neb {
                f[i] = [0.0; 3];
            }
        },
        Some(parallel) => {
            for &i in neb {
                let perp = perpendicular(f[i], fdot, tangent[i]);
                f[i] = add(perp, scale(parallel, tangent[i]));
            }
        },
    }

    Ok(PathStats {
        energy: energies.this,
        plen: segments.plen,
        nlen: segments.nlen,
        gradvnorm,
        fdot,
    })
}

/// [`compute_tangent`] followed by [`adjust_force`], reading positions from and
/// writing forces to the host.
///
/// # MPI
///
/// Collective over `replica`.
pub fn compute_tangent_and_adjust_force<C: Communicator, H: Host + ?Sized>(
    replica: &C,
    host: &mut H,
    role: ImageRole,
    params: &MixParams,
    energies: &Energies,
    neb: &[usize],
    xprev: &[V3],
    xnext: &[V3],
    tangent: &mut [V3],
) -> FailResult<PathStats> {
    let segments = {
        let host = &*host;
        compute_tangent(replica, role, energies, host, neb, &host.atoms().x, xprev, xnext, tangent)?
    };
    adjust_force(replica, role, params, energies, &segments, neb, tangent, &mut host.atoms_mut().f)
}

#[inline]
fn perpendicular(f: V3, fdot: f64, tangent: V3) -> V3
{ sub(f, scale(fdot, tangent)) }

/// How an un-normalized tangent is built from the two forward segment vectors.
#[derive(Debug, Copy, Clone, PartialEq)]
enum TangentRule {
    Next,
    Prev,
    /// Weights on the next and previous segments.
    Weighted { wnext: f64, wprev: f64 },
    /// Last replica: points backward, toward its only neighbor.
    Backward,
}

impl TangentRule {
    fn choose(role: ImageRole, energies: &Energies) -> FailResult<Self> {
        Ok(match role {
            ImageRole::First => TangentRule::Next,
            ImageRole::Last => TangentRule::Backward,
            ImageRole::Interior => {
                let (eprev, enext) = match (energies.prev, energies.next) {
                    (Some(eprev), Some(enext)) => (eprev, enext),
                    _ => bail!("interior replica is missing a neighbor energy"),
                };
                let e = energies.this;

                if enext > e && e > eprev {
                    TangentRule::Next
                } else if enext < e && e < eprev {
                    TangentRule::Prev
                } else {
                    let dnext = (enext - e).abs();
                    let dprev = (eprev - e).abs();
                    let vmax = f64::max(dnext, dprev);
                    let vmin = f64::min(dnext, dprev);
                    if vmax == 0.0 {
                        // flat stretch of the path; there is nothing to upwind by
                        return Ok(TangentRule::Weighted { wnext: 1.0, wprev: 1.0 });
                    }
                    match enext > eprev {
                        true => TangentRule::Weighted { wnext: vmax, wprev: vmin },
                        false => TangentRule::Weighted { wnext: vmin, wprev: vmax },
                    }
                }
            },
        })
    }

    fn apply(self, dprev: V3, dnext: V3) -> V3 {
        match self {
            TangentRule::Next => dnext,
            TangentRule::Prev => dprev,
            TangentRule::Weighted { wnext, wprev } => add(scale(wnext, dnext), scale(wprev, dprev)),
            TangentRule::Backward => scale(-1.0, dprev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NonPeriodic;
    use crate::local::{LocalComm, LocalUniverse};

    fn solo() -> LocalComm {
        match LocalUniverse::group(1).pop() {
            Some(comm) => comm,
            None => unreachable!(),
        }
    }

    fn energies(prev: f64, this: f64, next: f64) -> Energies {
        Energies { this, prev: Some(prev), next: Some(next) }
    }

    // Two atoms.  The path moves the first one along x and the second one along y.
    fn geometry() -> (Vec<V3>, Vec<V3>, Vec<V3>) {
        let x = vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let xprev = vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let xnext = vec![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0]];
        (x, xprev, xnext)
    }

    fn tangent_for(role: ImageRole, energies: &Energies) -> (Vec<V3>, Segments) {
        let (x, xprev, xnext) = geometry();
        let mut tangent = vec![[0.0; 3]; 2];
        let segments = compute_tangent(
            &solo(), role, energies, &NonPeriodic, &[0, 1], &x, &xprev, &xnext, &mut tangent,
        ).unwrap();
        (tangent, segments)
    }

    fn norm(t: &[V3]) -> f64 { t.iter().map(|&v| sqnorm(v)).sum::<f64>().sqrt() }

    fn close(a: f64, b: f64) -> bool { (a - b).abs() <= 1e-12 * f64::max(1.0, b.abs()) }

    #[test]
    fn monotonic_energies() {
        // uphill toward next: the tangent is the next segment only
        let (t, seg) = tangent_for(ImageRole::Interior, &energies(0.0, 1.0, 2.0));
        assert!(close(norm(&t), 1.0));
        assert_eq!(t, vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert!(close(seg.plen, 1.0));
        assert!(close(seg.nlen, 2.0));

        // and it points from here toward the next image
        let (x, _, xnext) = geometry();
        let toward_next: f64 = (0..2).map(|i| dot(t[i], sub(xnext[i], x[i]))).sum();
        assert!(toward_next > 0.0);

        // uphill toward previous: the previous segment only
        let (t, _) = tangent_for(ImageRole::Interior, &energies(2.0, 1.0, 0.0));
        assert_eq!(t, vec![[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn extremum_weights_favor_higher_neighbor() {
        // maximum, with the next image higher: vmax on next
        let (t, _) = tangent_for(ImageRole::Interior, &energies(1.0, 5.0, 4.0));
        // 4 * dnext + 1 * dprev, with dprev = (1, 0) and dnext = (0, 2)
        assert!(close(t[0][0], 1.0 / 65f64.sqrt()));
        assert!(close(t[1][1], 8.0 / 65f64.sqrt()));
        assert!(close(norm(&t), 1.0));

        // minimum, with the previous image higher: vmax on prev
        let (t, _) = tangent_for(ImageRole::Interior, &energies(4.0, 0.0, 1.0));
        // 1 * dnext + 4 * dprev
        assert!(close(t[0][0], 4.0 / 20f64.sqrt()));
        assert!(close(t[1][1], 2.0 / 20f64.sqrt()));
        assert!(close(norm(&t), 1.0));
    }

    #[test]
    fn tied_energies_still_give_a_tangent() {
        let e = energies(0.0, 0.0, 0.0);
        let x = vec![[1.0, 0.0, 0.0]];
        let xprev = vec![[0.0, 0.0, 0.0]];
        let xnext = vec![[3.0, 0.0, 0.0]];
        let mut t = vec![[0.0; 3]];
        let seg = compute_tangent(
            &solo(), ImageRole::Interior, &e, &NonPeriodic, &[0], &x, &xprev, &xnext, &mut t,
        ).unwrap();
        assert!(close(norm(&t), 1.0));
        assert_eq!(t, vec![[1.0, 0.0, 0.0]]);
        assert!(close(seg.plen, 1.0));
        assert!(close(seg.nlen, 2.0));

        // the spring pulls the image toward the middle of its neighbors
        let params = MixParams { kspring: 1.5, climbing: false, endpoints: EndpointMode::Fixed };
        let mut f = vec![[0.0; 3]];
        adjust_force(&solo(), ImageRole::Interior, &params, &e, &seg, &[0], &t, &mut f).unwrap();
        assert!(close(f[0][0], 1.5));
        assert_eq!((f[0][1], f[0][2]), (0.0, 0.0));
    }

    #[test]
    fn endpoints_use_their_only_neighbor() {
        let first = Energies { this: 0.0, prev: None, next: Some(1.0) };
        let (t, seg) = tangent_for(ImageRole::First, &first);
        assert_eq!(t, vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert_eq!(seg.plen, 0.0);

        let last = Energies { this: 0.0, prev: Some(1.0), next: None };
        let (t, seg) = tangent_for(ImageRole::Last, &last);
        assert_eq!(t, vec![[-1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(seg.nlen, 0.0);
    }

    #[test]
    fn degenerate_tangent_is_zero() {
        let x = vec![[1.0, 2.0, 3.0]];
        let mut tangent = vec![[9.0; 3]];
        let seg = compute_tangent(
            &solo(), ImageRole::Interior, &energies(0.0, 1.0, 2.0), &NonPeriodic,
            &[0], &x, &x, &x, &mut tangent,
        ).unwrap();
        assert_eq!(seg.tlen, 0.0);
        assert_eq!(tangent, vec![[0.0; 3]]);

        let params = MixParams { kspring: 1.0, climbing: false, endpoints: EndpointMode::Fixed };
        let mut f = vec![[0.5, -0.5, 1.0]];
        let stats = adjust_force(
            &solo(), ImageRole::Interior, &params, &energies(0.0, 1.0, 2.0), &seg, &[0], &tangent, &mut f,
        ).unwrap();
        assert_eq!(f, vec![[0.5, -0.5, 1.0]]);
        assert_eq!(stats.fdot, 0.0);
    }

    #[test]
    fn climbing_flips_only_the_parallel_part() {
        let e = energies(0.0, 1.0, 2.0);
        let (t, seg) = tangent_for(ImageRole::Interior, &e);
        let force = vec![[0.25, 0.75, -1.0], [0.5, 1.5, 2.0]];
        // an atom outside the group keeps its force no matter what
        let mut force_with_spectator = force.clone();
        force_with_spectator.push([7.0, 7.0, 7.0]);
        let mut t = t;
        t.push([0.0; 3]);

        let run = |climbing| {
            let params = MixParams { kspring: 2.0, climbing, endpoints: EndpointMode::Fixed };
            let mut f = force_with_spectator.clone();
            let stats = adjust_force(&solo(), ImageRole::Interior, &params, &e, &seg, &[0, 1], &t, &mut f).unwrap();
            (f, stats)
        };
        let (spring, spring_stats) = run(false);
        let (climb, climb_stats) = run(true);

        // true force along the tangent is 1.5
        assert!(close(spring_stats.fdot, 1.5));
        assert_eq!(spring_stats.gradvnorm, climb_stats.gradvnorm);
        assert_eq!(spring[2], [7.0; 3]);
        assert_eq!(climb[2], [7.0; 3]);

        let along = |f: &[V3]| -> f64 { (0..2).map(|i| dot(f[i], t[i])).sum() };
        assert!(close(along(&spring), 2.0 * (seg.nlen - seg.plen)));
        assert!(close(along(&climb), -1.5));

        // perpendicular parts agree exactly
        for i in 0..2 {
            let perp_spring = perpendicular(spring[i], along(&spring), t[i]);
            let perp_climb = perpendicular(climb[i], along(&climb), t[i]);
            for k in 0..3 {
                assert!(close(perp_spring[k], perp_climb[k]), "{:?} {:?}", perp_spring, perp_climb);
            }
            // and match the true force's
            let perp_true = perpendicular(force[i], 1.5, t[i]);
            for k in 0..3 {
                assert!(close(perp_spring[k], perp_true[k]));
            }
        }
    }

    #[test]
    fn endpoint_modes() {
        let first = Energies { this: 0.0, prev: None, next: Some(1.0) };
        let (t, seg) = tangent_for(ImageRole::First, &first);
        let force = vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let mut f = force.clone();
        let params = MixParams { kspring: 1.0, climbing: false, endpoints: EndpointMode::Fixed };
        adjust_force(&solo(), ImageRole::First, &params, &first, &seg, &[0, 1], &t, &mut f).unwrap();
        assert_eq!(f, vec![[0.0; 3]; 2]);

        let mut f = force.clone();
        let params = MixParams { endpoints: EndpointMode::Free, ..params };
        let stats = adjust_force(&solo(), ImageRole::First, &params, &first, &seg, &[0, 1], &t, &mut f).unwrap();
        assert_eq!(f, force);
        assert!(close(stats.fdot, 5.0));
    }

    #[test]
    fn replica_wide_reductions() {
        // the geometry of `tangent_for`, split over two processes
        let (x, xprev, xnext) = geometry();
        let e = energies(1.0, 5.0, 4.0);
        let (serial, serial_seg) = tangent_for(ImageRole::Interior, &e);

        let out = LocalUniverse::run(LocalUniverse::partitioned(&[2]), |process| {
            let i = process.comms.replica.rank();
            let mut t = vec![[0.0; 3]];
            let seg = compute_tangent(
                &process.comms.replica, ImageRole::Interior, &e, &NonPeriodic, &[0],
                &x[i..i + 1], &xprev[i..i + 1], &xnext[i..i + 1], &mut t,
            ).unwrap();
            (t[0], seg)
        });
        for (i, (t, seg)) in out.into_iter().enumerate() {
            for k in 0..3 {
                assert!(close(t[k], serial[i][k]));
            }
            assert!(close(seg.plen, serial_seg.plen));
            assert!(close(seg.nlen, serial_seg.nlen));
        }
    }

    #[test]
    fn periodic_segments() {
        use crate::host::Orthorhombic;

        // the neighbor images sit just across the boundary
        let cell = Orthorhombic { periods: [Some(10.0), None, None] };
        let x = vec![[9.5, 0.0, 0.0]];
        let xprev = vec![[9.0, 0.0, 0.0]];
        let xnext = vec![[0.5, 0.0, 0.0]];
        let mut t = vec![[0.0; 3]];
        let seg = compute_tangent(
            &solo(), ImageRole::Interior, &energies(0.0, 1.0, 2.0), &cell, &[0], &x, &xprev, &xnext, &mut t,
        ).unwrap();
        assert!(close(seg.plen, 0.5));
        assert!(close(seg.nlen, 1.0));
        assert!(close(t[0][0], 1.0));
    }
}
