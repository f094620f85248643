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

// NOTE: Please make sure to use the YamlRead trait when deserializing these types!

use serde::de;

/// Root settings object.
///
/// This is what you should deserialize.
#[derive(Serialize)]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSettings(pub Settings);

/// Raw deserialized form of settings.
///
/// You shouldn't deserialize this type directly; deserialize `ValidatedSettings` instead,
/// so that cross-references between sections are checked before anything runs.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub threading: Threading,

    /// See the type for documentation.
    pub neb: Neb,

    /// See the type for documentation.
    pub replicas: Replicas,

    /// See the type for documentation.
    pub potential: Potential,

    /// See the type for documentation.
    pub system: System,

    /// See the type for documentation.
    pub minimize: Minimize,
}
derive_yaml_read!{ValidatedSettings}

impl<'de> de::Deserialize<'de> for ValidatedSettings {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cereal: Settings = de::Deserialize::deserialize(deserializer)?;

        cereal.validate().map_err(de::Error::custom)
    }
}

impl std::ops::Deref for ValidatedSettings {
    type Target = Settings;

    fn deref(&self) -> &Settings { &self.0 }
}

/// Settings of the NEB force fix itself.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Neb {
    /// Spring constant along the path, in energy per squared distance.
    pub spring_constant: f64,

    /// Zero-based index of the replica that climbs to the saddle point.
    ///
    /// Must be an interior replica.  `None` runs plain NEB.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub climbing_replica: Option<usize>,

    /// Name of the energy source that supplies each replica's potential energy.
    #[serde(default = "_neb__energy_source")]
    pub energy_source: String,

    #[serde(default)]
    pub exchange: ExchangeMode,

    #[serde(default)]
    pub endpoints: Endpoints,

    /// Atoms that take part in the path.  Others keep their physical forces.
    #[serde(default)]
    pub group: Group,
}
fn _neb__energy_source() -> String { "thermo_pe".to_string() }

/// How neighbor coordinates are communicated.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeMode {
    /// `direct` when every replica runs on exactly one process, else `gather`.
    Auto,
    /// Point-to-point between processes that hold the same atoms.
    Direct,
    /// Through replica roots, matched by atom identity.
    Gather,
}

impl Default for ExchangeMode {
    fn default() -> Self { ExchangeMode::Auto }
}

/// Treatment of the first and last replicas.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoints {
    /// Forces on the endpoints are zeroed.
    Fixed,
    /// Endpoints relax in their own basins.
    Free,
}

impl Default for Endpoints {
    fn default() -> Self { Endpoints::Fixed }
}

/// Either `all`, or an explicit list of atom tags.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Group {
    Named(GroupName),
    Tags(Vec<u64>),
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GroupName {
    All,
}

impl Default for Group {
    fn default() -> Self { Group::Named(GroupName::All) }
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Replicas {
    /// Number of processes for each replica.  The length is the number of replicas.
    pub procs: Vec<usize>,
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Potential {
    pub soft: SoftPotential,
}

/// `E(r) = A (1 + cos(pi r / rc))` for `r < rc`.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SoftPotential {
    /// Cutoff used by coefficients that do not supply their own.
    pub cutoff: f64,

    /// Rule for the cutoffs of unspecified cross-type pairs.
    #[serde(default)]
    pub mixing: Mixing,

    pub coeffs: Vec<SoftCoeff>,
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mixing {
    Geometric,
    Arithmetic,
}

impl Default for Mixing {
    fn default() -> Self { Mixing::Geometric }
}

/// One pair of atom types.
///
/// Give either `prefactor`, or both `start` and `stop` for a ramped prefactor.
/// Minimization uses the `stop` value.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SoftCoeff {
    /// Zero-based atom types.
    pub types: [usize; 2],

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefactor: Option<f64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<f64>,
}

impl SoftCoeff {
    /// `(start, stop)`, for a coefficient that passed validation.
    pub fn ramp(&self) -> Option<(f64, f64)> {
        match (self.prefactor, self.start, self.stop) {
            (Some(a), None, None) => Some((a, a)),
            (None, Some(start), Some(stop)) => Some((start, stop)),
            _ => None,
        }
    }
}

/// The atoms, and the two ends of the path.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct System {
    /// Zero-based type of each atom.
    pub types: Vec<usize>,

    /// Identity of each atom.  Defaults to `1..=N`.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<u64>>,

    /// Positions in the first replica.
    pub initial: Vec<[f64; 3]>,

    /// Positions in the last replica.
    #[serde(rename = "final")]
    pub final_: Vec<[f64; 3]>,

    /// Explicit positions for every replica, endpoints included.
    ///
    /// When absent, interior replicas are linearly interpolated.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Vec<[f64; 3]>>>,

    /// Tags of atoms whose forces are always zeroed.
    #[serde(default)]
    pub frozen: Vec<u64>,

    /// Period along each axis; `null` for a non-periodic axis.
    #[serde(default)]
    pub periods: [Option<f64>; 3],
}

impl System {
    pub fn natoms(&self) -> usize { self.types.len() }

    pub fn tags(&self) -> Vec<u64> {
        match &self.tags {
            Some(tags) => tags.clone(),
            None => (1..=self.natoms() as u64).collect(),
        }
    }

    /// Positions of one replica in a chain of `nreplica`.
    pub fn image_positions(&self, ireplica: usize, nreplica: usize) -> Vec<[f64; 3]> {
        if let Some(images) = &self.images {
            return images[ireplica].clone();
        }

        let t = ireplica as f64 / (nreplica - 1) as f64;
        self.initial.iter().zip(&self.final_)
            .map(|(a, b)| {
                let mut x = [0.0; 3];
                for k in 0..3 {
                    x[k] = a[k] + t * (b[k] - a[k]);
                }
                x
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Minimize {
    pub fire: Fire,

    /// Stop once the largest replica force norm falls below this.
    #[serde(default = "_minimize__ftol")]
    pub ftol: f64,

    #[serde(default = "_minimize__max_iterations")]
    pub max_iterations: u32,

    /// Iterations between progress reports.
    #[serde(default = "_minimize__log_every")]
    pub log_every: u32,
}
fn _minimize__ftol() -> f64 { 1e-6 }
fn _minimize__max_iterations() -> u32 { 1000 }
fn _minimize__log_every() -> u32 { 50 }

/// Parameters of the FIRE minimizer.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Fire {
    /// Initial damping coefficient, restored after every bad step.
    #[serde(default = "_fire__damping_init")]
    pub damping_init: f64,

    /// Multiplies the damping after each accelerated step.
    #[serde(default = "_fire__damping_reduction")]
    pub damping_reduction: f64,

    /// Good steps required before the timestep may grow.
    #[serde(default = "_fire__speedup_latency")]
    pub speedup_latency: u32,

    #[serde(default = "_fire__speedup_factor")]
    pub speedup_factor: f64,

    #[serde(default = "_fire__slowdown_factor")]
    pub slowdown_factor: f64,

    pub timestep_max: f64,

    #[serde(default = "_fire__mass")]
    pub mass: f64,
}
fn _fire__damping_init() -> f64 { 0.1 }
fn _fire__damping_reduction() -> f64 { 0.99 }
fn _fire__speedup_latency() -> u32 { 5 }
fn _fire__speedup_factor() -> f64 { 1.1 }
fn _fire__slowdown_factor() -> f64 { 0.5 }
fn _fire__mass() -> f64 { 1.0 }

#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Threading {
    /// Evaluate pair forces in parallel within each process.
    Rayon,
    Serial,
}

impl Default for Threading {
    fn default() -> Self { Threading::Serial }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::YamlRead;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = "
neb:
  spring-constant: 1.0
replicas:
  procs: [1, 2, 1]
potential:
  soft:
    cutoff: 1.0
    coeffs:
      - { types: [0, 0], prefactor: 2.0 }
system:
  types: [0, 0]
  initial: [[0, 0, 0], [1, 0, 0]]
  final: [[0, 0, 0], [3, 0, 0]]
minimize:
  fire: { timestep-max: 0.1 }
";

    #[test]
    fn defaults() {
        let settings = ValidatedSettings::from_str(MINIMAL).unwrap();
        assert_eq!(settings.neb.energy_source, "thermo_pe");
        assert_eq!(settings.neb.exchange, ExchangeMode::Auto);
        assert_eq!(settings.neb.endpoints, Endpoints::Fixed);
        assert_eq!(settings.neb.group, Group::Named(GroupName::All));
        assert_eq!(settings.neb.climbing_replica, None);
        assert_eq!(settings.potential.soft.mixing, Mixing::Geometric);
        assert_eq!(settings.minimize.fire.speedup_latency, 5);
        assert_eq!(settings.minimize.max_iterations, 1000);
        assert_eq!(settings.threading, Threading::Serial);
        assert_eq!(settings.system.tags(), vec![1, 2]);
        assert_eq!(settings.system.periods, [None, None, None]);
    }

    #[test]
    fn group_forms() {
        let all: Group = serde_yaml::from_str("all").unwrap();
        assert_eq!(all, Group::Named(GroupName::All));
        let tags: Group = serde_yaml::from_str("[3, 4]").unwrap();
        assert_eq!(tags, Group::Tags(vec![3, 4]));
    }

    #[test]
    fn ramp() {
        let coeff = |prefactor, start, stop| SoftCoeff { types: [0, 0], prefactor, start, stop, cutoff: None };
        assert_eq!(coeff(Some(2.0), None, None).ramp(), Some((2.0, 2.0)));
        assert_eq!(coeff(None, Some(0.0), Some(5.0)).ramp(), Some((0.0, 5.0)));
        assert_eq!(coeff(Some(2.0), Some(0.0), None).ramp(), None);
    }

    #[test]
    fn interpolated_images() {
        let settings = ValidatedSettings::from_str(MINIMAL).unwrap();
        assert_eq!(settings.system.image_positions(0, 3), settings.system.initial);
        assert_eq!(settings.system.image_positions(1, 3)[1], [2.0, 0.0, 0.0]);
        assert_eq!(settings.system.image_positions(2, 3), settings.system.final_);
    }

    #[test]
    fn survives_json() {
        let settings = ValidatedSettings::from_str(MINIMAL).unwrap();
        let json = serde_json::to_string_pretty(&settings).unwrap();
        assert!(json.contains("\"spring-constant\": 1.0"));
        assert!(json.contains("\"final\""));
    }
}
