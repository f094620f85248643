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

use crate::FailResult;
use crate::engine::{Engine, InitialAtom, SetForceZero, FROZEN, NEB_GROUP};
use crate::minimize;

use rsp2_potentials::soft::{self, Soft};
use rsp2_replica::{Communicator, EndpointMode, ExchangeMode, GroupBit, HookTable, NebError};
use rsp2_replica::{NebFix, NebSettings, Orthorhombic, PathReport, ReplicaComms, ReplicaTopology};
use rsp2_replica::local::LocalUniverse;
use rsp2_tasks_config::{self as cfg, ValidatedSettings};

use std::collections::HashSet;

/// Build the pair table described by the settings.
pub fn build_potential(settings: &cfg::SoftPotential) -> FailResult<Soft> {
    let ntypes = {
        settings.coeffs.iter()
            .map(|c| usize::max(c.types[0], c.types[1]) + 1)
            .max()
            .unwrap_or(0)
    };
    let mixing = match settings.mixing {
        cfg::Mixing::Geometric => soft::MixRule::Geometric,
        cfg::Mixing::Arithmetic => soft::MixRule::Arithmetic,
    };

    let mut builder = soft::Builder::new(ntypes, settings.cutoff, mixing)?;
    for coeff in &settings.coeffs {
        let (start, stop) = match coeff.ramp() {
            Some(ramp) => ramp,
            None => bail!("soft coefficient for types {:?} has no prefactor", coeff.types),
        };
        builder.set_coeff(coeff.types[0], coeff.types[1], start, stop, coeff.cutoff)?;
    }
    builder.build()
}

fn neb_settings(neb: &cfg::Neb) -> NebSettings {
    NebSettings {
        kspring: neb.spring_constant,
        climbing_replica: neb.climbing_replica,
        energy_source: neb.energy_source.clone(),
        exchange: match neb.exchange {
            cfg::ExchangeMode::Auto => ExchangeMode::Auto,
            cfg::ExchangeMode::Direct => ExchangeMode::Direct,
            cfg::ExchangeMode::Gather => ExchangeMode::Gather,
        },
        endpoints: match neb.endpoints {
            cfg::Endpoints::Fixed => EndpointMode::Fixed,
            cfg::Endpoints::Free => EndpointMode::Free,
        },
        group: NEB_GROUP,
    }
}

/// The atoms of one replica, with group bits.
///
/// Frozen atoms are left out of the NEB group so that their forces stay zero.
fn initial_atoms(system: &cfg::System, group: &cfg::Group, ireplica: usize, nreplica: usize) -> Vec<InitialAtom> {
    let frozen: HashSet<u64> = system.frozen.iter().cloned().collect();
    let in_group = |tag: &u64| match group {
        cfg::Group::Named(cfg::GroupName::All) => true,
        cfg::Group::Tags(tags) => tags.contains(tag),
    };

    let positions = system.image_positions(ireplica, nreplica);
    system.tags().into_iter()
        .zip(&system.types)
        .zip(positions)
        .map(|((tag, &ty), x)| {
            let mut mask = GroupBit::ALL.0;
            if frozen.contains(&tag) {
                mask |= FROZEN.0;
            } else if in_group(&tag) {
                mask |= NEB_GROUP.0;
            }
            InitialAtom { tag, ty, x, mask }
        })
        .collect()
}

/// Everything one process does during a run.
///
/// # MPI
///
/// Collective over the world.
pub fn run_process<C: Communicator>(
    settings: &ValidatedSettings,
    potential: &Soft,
    ireplica: usize,
    comms: &ReplicaComms<C>,
) -> FailResult<PathReport> {
    let topo = ReplicaTopology::discover(comms, ireplica)?;
    if topo.me_universe == 0 {
        info!("{} replicas on {} processes", topo.nreplica, topo.nprocs_universe);
    }

    let atoms = initial_atoms(&settings.system, &settings.neb.group, ireplica, topo.nreplica);
    let cell = Orthorhombic { periods: settings.system.periods };
    let use_rayon = settings.threading == cfg::Threading::Rayon;
    let mut engine = Engine::new(&comms.replica, potential, cell, use_rayon, &atoms)?;

    let mut fix = NebFix::new(neb_settings(&settings.neb), comms, topo.clone());
    let outcome = {
        let mut hooks = HookTable::new();
        hooks.push(SetForceZero::new(FROZEN));
        hooks.push(&mut fix);
        minimize::fire(comms, &topo, &settings.minimize, &mut engine, &mut hooks)?
    };
    if !outcome.converged && topo.me_universe == 0 {
        warn!("path did not converge within {} iterations (fmax = {:e})", outcome.iterations, outcome.fmax);
    }
    debug!("fix neb: {} calls, exchange {:?}", fix.ncalls(), fix.exchange_name());

    let report = PathReport::gather(comms, &topo, &fix.stats())?;
    if topo.me_universe == 0 {
        for line in report.to_string().lines() {
            info!("{}", line);
        }
    }
    Ok(report)
}

/// Errors that only report that some other process failed first.
fn is_secondary(e: &failure::Error) -> bool {
    match e.downcast_ref::<NebError>() {
        Some(NebError::Aborted) | Some(NebError::PeerHungUp(_)) => true,
        _ => false,
    }
}

/// Pick the error that explains a failed run.
fn first_cause(results: Vec<FailResult<PathReport>>) -> FailResult<PathReport> {
    let mut errors = vec![];
    let mut reports = vec![];
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        return match reports.into_iter().next() {
            Some(report) => Ok(report),
            None => bail!("no processes were run"),
        };
    }
    let index = errors.iter().position(|e| !is_secondary(e)).unwrap_or(0);
    Err(errors.swap_remove(index))
}

/// Run a whole path search in this process, one thread per simulated process.
pub fn run_neb(settings: &ValidatedSettings) -> FailResult<PathReport> {
    let potential = build_potential(&settings.potential.soft)?;
    let processes = LocalUniverse::partitioned(&settings.replicas.procs);

    let results = LocalUniverse::run(processes, |process| {
        let result = run_process(settings, &potential, process.ireplica, &process.comms);
        if let Err(e) = &result {
            if !is_secondary(e) {
                crate::logging::log_causes(e);
            }
            process.comms.abort();
        }
        result
    });
    first_cause(results)
}

/// Run a path search on MPI.  The world size must match the replica layout.
///
/// Returns the report on world rank 0 only.  A failing process logs its error
/// before it aborts the job, as MPI gives it no later chance to.
#[cfg(feature = "mpi-support")]
pub fn run_neb_mpi(
    settings: &ValidatedSettings,
    world: &impl ::mpi::topology::Communicator,
) -> FailResult<Option<PathReport>> {
    let potential = build_potential(&settings.potential.soft)?;
    let (ireplica, comms) = rsp2_replica::mpi_comm::split_world(world, &settings.replicas.procs)?;

    match run_process(settings, &potential, ireplica, &comms) {
        Ok(report) => Ok(match comms.world.rank() {
            0 => Some(report),
            _ => None,
        }),
        Err(e) => {
            crate::logging::log_causes(&e);
            comms.abort();
            Err(e)
        },
    }
}
