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

//! Lifecycle hooks, and the NEB fix that plugs into them.

use crate::{FailResult, Tag, V3};
use crate::errors::NebError;
use crate::comm::{Communicator, ReplicaComms};
use crate::topology::{ImageRole, ReplicaTopology};
use crate::buffer::NebBuffers;
use crate::exchange::{self, Direction, DirectExchange, GatheredExchange, NeighborExchange};
use crate::host::{GroupBit, Host};
use crate::tangent::{self, EndpointMode, MixParams, PathStats};

use slice_of_array::prelude::*;

/// Something the minimization driver calls back into.
///
/// Both methods default to doing nothing, so a hook only implements the events it
/// cares about.
pub trait MinimizeHook<H: ?Sized> {
    fn name(&self) -> &str;

    /// Called once, before the first force evaluation.
    fn on_before_minimization(&mut self, _host: &mut H) -> FailResult<()> { Ok(()) }

    /// Called after every force evaluation, including the first.
    fn on_post_force(&mut self, _host: &mut H) -> FailResult<()> { Ok(()) }
}

impl<'a, H: ?Sized, T: MinimizeHook<H> + ?Sized> MinimizeHook<H> for &'a mut T {
    fn name(&self) -> &str { (**self).name() }

    fn on_before_minimization(&mut self, host: &mut H) -> FailResult<()>
    { (**self).on_before_minimization(host) }

    fn on_post_force(&mut self, host: &mut H) -> FailResult<()>
    { (**self).on_post_force(host) }
}

/// The ordered list of hooks held by a driver.  Hooks run in the order they were pushed.
pub struct HookTable<'a, H: ?Sized> {
    hooks: Vec<Box<dyn MinimizeHook<H> + 'a>>,
}

impl<'a, H: ?Sized> Default for HookTable<'a, H> {
    fn default() -> Self { HookTable { hooks: vec![] } }
}

impl<'a, H: ?Sized> HookTable<'a, H> {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, hook: impl MinimizeHook<H> + 'a) -> &mut Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn names(&self) -> Vec<&str> { self.hooks.iter().map(|h| h.name()).collect() }

    pub fn len(&self) -> usize { self.hooks.len() }
    pub fn is_empty(&self) -> bool { self.hooks.is_empty() }

    pub fn before_minimization(&mut self, host: &mut H) -> FailResult<()> {
        for hook in &mut self.hooks {
            trace!("before minimization: {}", hook.name());
            hook.on_before_minimization(host)?;
        }
        Ok(())
    }

    pub fn post_force(&mut self, host: &mut H) -> FailResult<()> {
        for hook in &mut self.hooks {
            hook.on_post_force(host)?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------

/// How NEB atom positions travel between replicas.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExchangeMode {
    /// `Direct` when every replica runs on a single process, `Gather` otherwise.
    Auto,
    /// Trade lists with counterpart ranks.  Verified during initialization.
    Direct,
    /// Gather each replica onto its root first.
    Gather,
}

impl Default for ExchangeMode {
    fn default() -> Self { ExchangeMode::Auto }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NebSettings {
    pub kspring: f64,
    /// Fixed for the whole run.
    pub climbing_replica: Option<usize>,
    /// Name of the energy source queried from the host.
    pub energy_source: String,
    pub exchange: ExchangeMode,
    pub endpoints: EndpointMode,
    /// Atoms that take part in the path.
    pub group: GroupBit,
}

impl NebSettings {
    pub fn new(kspring: f64) -> Self {
        NebSettings {
            kspring,
            climbing_replica: None,
            energy_source: "thermo_pe".into(),
            exchange: ExchangeMode::Auto,
            endpoints: EndpointMode::Fixed,
            group: GroupBit::ALL,
        }
    }
}

/// State captured by `initialize`.
struct Initialized<C> {
    ntotal: u64,
    nebatoms: u64,
    exchange: Box<dyn NeighborExchange<C>>,
}

/// Couples one replica to its neighbors along the chain.
///
/// On every force evaluation, this fetches the positions that the neighboring replicas
/// assign to each local NEB atom and replaces the forces on those atoms with NEB forces.
pub struct NebFix<'a, C: Communicator> {
    settings: NebSettings,
    comms: &'a ReplicaComms<C>,
    topo: ReplicaTopology,
    buffers: NebBuffers,
    init: Option<Initialized<C>>,
    stats: PathStats,
    ncalls: u64,
}

impl<'a, C: Communicator> NebFix<'a, C> {
    pub fn new(settings: NebSettings, comms: &'a ReplicaComms<C>, topo: ReplicaTopology) -> Self {
        NebFix {
            settings,
            comms,
            topo,
            buffers: NebBuffers::default(),
            init: None,
            stats: PathStats::default(),
            ncalls: 0,
        }
    }

    pub fn settings(&self) -> &NebSettings { &self.settings }
    pub fn topology(&self) -> &ReplicaTopology { &self.topo }
    pub fn buffers(&self) -> &NebBuffers { &self.buffers }

    /// Diagnostics from the most recent force evaluation.
    pub fn stats(&self) -> PathStats { self.stats }

    /// Number of completed `on_post_force` calls.
    pub fn ncalls(&self) -> u64 { self.ncalls }

    /// Total number of NEB atoms in each replica, once initialized.
    pub fn nebatoms(&self) -> Option<u64> { self.init.as_ref().map(|init| init.nebatoms) }

    /// Name of the selected exchange strategy, once initialized.
    pub fn exchange_name(&self) -> Option<&'static str> { self.init.as_ref().map(|init| init.exchange.name()) }

    /// Is this the climbing image?
    pub fn is_climbing(&self) -> bool { self.settings.climbing_replica == Some(self.topo.ireplica) }

    /// Validate the settings against the host and the chain, and pick an exchange strategy.
    ///
    /// # MPI
    ///
    /// Collective over both scopes.  Configuration errors are detected before any
    /// communication, identically on every process.
    pub fn initialize<H: Host + ?Sized>(&mut self, host: &H) -> FailResult<()> {
        let settings = &self.settings;
        if !host.has_energy_source(&settings.energy_source) {
            throw!(NebError::MissingEnergySource(settings.energy_source.clone()));
        }
        if !(settings.kspring > 0.0 && settings.kspring.is_finite()) {
            throw!(NebError::BadSpringConstant(settings.kspring));
        }
        if let Some(replica) = settings.climbing_replica {
            if replica == 0 || replica + 1 >= self.topo.nreplica {
                throw!(NebError::BadClimbingReplica { replica, nreplica: self.topo.nreplica });
            }
        }

        let ntotal = host.natoms();
        let nebatoms = {
            let atoms = host.atoms();
            let nlocal = atoms.group_indices(settings.group).len();
            self.comms.replica.all_sum(nlocal as f64)? as u64
        };
        self.check_same_on_every_replica(ntotal, NebError::AtomCountMismatch)?;
        self.check_same_on_every_replica(nebatoms, NebError::NebAtomCountMismatch)?;

        let exchange: Box<dyn NeighborExchange<C>> = match settings.exchange {
            ExchangeMode::Gather => Box::new(GatheredExchange),
            ExchangeMode::Auto => match (0..self.topo.nreplica).all(|r| self.topo.nprocs_of(r) == 1) {
                true => Box::new(DirectExchange),
                false => Box::new(GatheredExchange),
            },
            ExchangeMode::Direct => {
                let atoms = host.atoms();
                let tags: Vec<Tag> = {
                    atoms.group_indices(settings.group).into_iter()
                        .map(|i| atoms.tag[i])
                        .collect()
                };
                DirectExchange::verify(self.comms, &self.topo, &tags)?;
                Box::new(DirectExchange)
            },
        };

        self.buffers.ensure(host.atoms().nlocal());

        if self.topo.me_universe == 0 {
            info!(
                "NEB: {} replicas, {} atoms ({} NEB), {} exchange, climbing replica: {}",
                self.topo.nreplica, ntotal, nebatoms, exchange.name(),
                match settings.climbing_replica {
                    Some(r) => r.to_string(),
                    None => "none".to_string(),
                },
            );
        }
        debug!(
            "replica {}: rank {} of {} (world rank {})",
            self.topo.ireplica, self.topo.me, self.topo.nprocs, self.topo.me_universe,
        );

        self.init = Some(Initialized { ntotal, nebatoms, exchange });
        Ok(())
    }

    // Each replica's root reports its value; everybody checks the lot.
    fn check_same_on_every_replica(&self, value: u64, err: fn(Vec<u64>) -> NebError) -> FailResult<()> {
        let all = self.comms.world.all_gather(value)?;
        let per_replica: Vec<u64> = (0..self.topo.nreplica).map(|r| all[self.topo.root_of(r)]).collect();
        if per_replica.iter().any(|&v| v != per_replica[0]) {
            throw!(err(per_replica));
        }
        Ok(())
    }

    /// Replace the forces on NEB atoms.
    ///
    /// # MPI
    ///
    /// Collective over both scopes.
    pub fn post_force<H: Host + ?Sized>(&mut self, host: &mut H) -> FailResult<()> {
        let init = match &mut self.init {
            Some(init) => init,
            None => bail!("NEB fix used before initialization"),
        };

        let natoms = host.natoms();
        if natoms != init.ntotal {
            throw!(NebError::AtomCountChanged { initial: init.ntotal, current: natoms });
        }

        let energy = match host.potential_energy(&self.settings.energy_source) {
            Some(energy) => energy,
            None => throw!(NebError::MissingEnergySource(self.settings.energy_source.clone())),
        };
        let energies = exchange::exchange_energies(self.comms, &self.topo, energy)?;

        let group = self.settings.group;
        let neb = host.atoms().group_indices(group);

        // refresh the neighbor configuration
        {
            let atoms = host.atoms();
            let buffers = &mut self.buffers;
            buffers.ensure(atoms.nlocal());
            buffers.tagsend.assign(neb.iter().map(|&i| atoms.tag[i]));
            buffers.xsend.set_len(3 * neb.len());
            for (dest, &i) in buffers.xsend[..].nest_mut::<V3>().iter_mut().zip(&neb) {
                *dest = atoms.x[i];
            }

            let lists = init.exchange.exchange(self.comms, &self.topo, &buffers.tagsend, &buffers.xsend)?;
            let is_neb = |i: usize| atoms.in_group(i, group);
            if let Some(list) = &lists.prev {
                exchange::match_by_tag(list, Direction::Prev, &atoms.tag, is_neb, &mut buffers.xprev)?;
            }
            if let Some(list) = &lists.next {
                exchange::match_by_tag(list, Direction::Next, &atoms.tag, is_neb, &mut buffers.xnext)?;
            }
        }

        let params = MixParams {
            kspring: self.settings.kspring,
            climbing: self.is_climbing(),
            endpoints: self.settings.endpoints,
        };
        let buffers = &mut self.buffers;
        self.stats = tangent::compute_tangent_and_adjust_force(
            &self.comms.replica, host, self.topo.role(), &params, &energies, &neb,
            &buffers.xprev, &buffers.xnext, &mut buffers.tangent,
        )?;
        self.ncalls += 1;

        trace!(
            "replica {}: E = {:.6}, plen = {:.6}, nlen = {:.6}, gradvnorm = {:.6}",
            self.topo.ireplica, self.stats.energy, self.stats.plen, self.stats.nlen, self.stats.gradvnorm,
        );
        Ok(())
    }

    pub fn role(&self) -> ImageRole { self.topo.role() }
}

impl<'a, C: Communicator, H: Host + ?Sized> MinimizeHook<H> for NebFix<'a, C> {
    fn name(&self) -> &str { "neb" }

    fn on_before_minimization(&mut self, host: &mut H) -> FailResult<()>
    { self.initialize(host) }

    fn on_post_force(&mut self, host: &mut H) -> FailResult<()>
    { self.post_force(host) }
}
