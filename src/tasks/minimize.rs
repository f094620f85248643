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

//! FIRE, run in lockstep by every process of every replica.
//!
//! Each replica integrates its own atoms with its own state machine.  Dot products
//! and norms reduce over the replica; the stopping test reduces over the world, so
//! that every process leaves the loop on the same iteration.

use crate::FailResult;
use crate::engine::{Engine, Parts};

use rsp2_replica::{Communicator, HookTable, Host, ReplicaComms, ReplicaTopology};
use rsp2_tasks_config as cfg;

use itertools::Itertools;
use log::Level;

#[derive(Debug, Clone, PartialEq)]
pub struct FireOutcome {
    /// Completed steps.
    pub iterations: u32,
    /// Whether the force tolerance was met, as opposed to running out of iterations.
    pub converged: bool,
    /// Largest replica force norm at exit.
    pub fmax: f64,
    pub timestep: f64,
}

use fsm::*;
mod fsm {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct FireFsm {
        params: cfg::Fire,
        damping_coeff: f64,
        timestep: f64,
        num_good_steps: u32,
    }

    #[derive(Debug, Clone)]
    pub struct FireFsmOutput {
        pub timestep: f64,
        pub damping_coeff: f64,
        pub should_reset_velocity: bool,
    }

    impl FireFsm {
        pub fn new(params: &cfg::Fire) -> Self {
            FireFsm {
                params: params.clone(),
                damping_coeff: params.damping_init,
                timestep: params.timestep_max * 0.1,
                num_good_steps: 0,
            }
        }

        pub fn output(&self) -> FireFsmOutput {
            let should_reset_velocity = self.num_good_steps == 0;
            FireFsmOutput {
                timestep: self.timestep,
                damping_coeff: self.damping_coeff,
                should_reset_velocity,
            }
        }

        pub fn check_grad_dot_vel(mut self, dot: f64) -> FireFsm {
            if dot < 0.0 {
                self.num_good_steps += 1;
                if self.num_good_steps >= self.params.speedup_latency {
                    self.timestep *= self.params.speedup_factor;
                    self.damping_coeff *= self.params.damping_reduction;
                }
            } else {
                self.num_good_steps = 0;
                self.timestep *= self.params.slowdown_factor;
                self.damping_coeff = self.params.damping_init;
            }
            self.timestep = f64::min(self.timestep, self.params.timestep_max);
            self
        }
    }
}

fn local_dot(a: &[[f64; 3]], b: &[[f64; 3]]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).sum()
}

/// Relax every replica, applying the hooks after each force evaluation.
///
/// # MPI
///
/// Collective over the world.
pub fn fire<'e, C: Communicator>(
    comms: &ReplicaComms<C>,
    topo: &ReplicaTopology,
    settings: &cfg::Minimize,
    engine: &mut Engine<'e, C>,
    hooks: &mut HookTable<'_, Engine<'e, C>>,
) -> FailResult<FireOutcome>
{
    let params = &settings.fire;
    let chatty = match comms.world.rank() {
        0 => Level::Info,
        _ => Level::Trace,
    };

    hooks.before_minimization(engine)?;
    evaluate(engine, hooks)?;
    for v in engine.parts_mut().v {
        *v = [0.0; 3];
    }

    let mut fsm = FireFsm::new(params);
    let mut iterations = 0;
    loop {
        let fnorm = {
            let f = &engine.atoms().f;
            comms.replica.all_sum(local_dot(f, f))?.sqrt()
        };
        let fmax = comms.world.all_max(fnorm)?;
        let converged = fmax <= settings.ftol;

        if converged || iterations % settings.log_every == 0 || iterations == settings.max_iterations {
            // collective, so it must not depend on the rank
            let energies = comms.world.all_gather(engine.potential_energy(crate::engine::ENERGY_SOURCE).unwrap_or(0.0))?;
            let energies = (0..topo.nreplica).map(|r| energies[topo.root_of(r)]);
            log!(chatty, "iter {:>5}  fmax {:>12.6e}  dt {:>10.4e}  E [{}]",
                iterations, fmax, fsm.output().timestep,
                energies.map(|e| format!("{:.6}", e)).join(", "),
            );
        }

        if converged || iterations == settings.max_iterations {
            log!(chatty, "FIRE Finished.");
            log!(chatty, "Iterations: {}", iterations);
            log!(chatty, " Converged: {}", converged);
            log!(chatty, "  Max Norm: {:e}", fmax);
            return Ok(FireOutcome { iterations, converged, fmax, timestep: fsm.output().timestep });
        }

        let out = fsm.output();
        {
            let Parts { x, v, f } = engine.parts_mut();
            if out.should_reset_velocity {
                for v in v.iter_mut() {
                    *v = [0.0; 3];
                }
            }

            let dt_m = out.timestep / params.mass;
            for (v, f) in v.iter_mut().zip(f) {
                for k in 0..3 {
                    v[k] += dt_m * f[k];
                }
            }

            // the mix needs replica-wide norms
            let vnorm = comms.replica.all_sum(local_dot(v, v))?.sqrt();
            if fnorm > 0.0 {
                let alpha = out.damping_coeff;
                for (v, f) in v.iter_mut().zip(f) {
                    for k in 0..3 {
                        v[k] = (1.0 - alpha) * v[k] + alpha * vnorm * f[k] / fnorm;
                    }
                }
            }

            for (x, v) in x.iter_mut().zip(v.iter()) {
                for k in 0..3 {
                    x[k] += out.timestep * v[k];
                }
            }
        }

        engine.migrate()?;
        evaluate(engine, hooks)?;

        let power = comms.replica.all_sum(local_dot(&engine.atoms().f, engine.velocities()))?;
        fsm = fsm.check_grad_dot_vel(-power);
        iterations += 1;
    }
}

fn evaluate<'e, C: Communicator>(
    engine: &mut Engine<'e, C>,
    hooks: &mut HookTable<'_, Engine<'e, C>>,
) -> FailResult<()> {
    engine.compute_forces()?;
    hooks.post_force(engine)
}
