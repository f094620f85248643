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

//! All of the checking that happens after deserialization is written here.
//!
//! Anything that can be decided from the config alone is rejected here, before
//! any process is started.

use crate::config::*;
use failure::Error;
use std::collections::HashSet;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum SettingsError {
    #[fail(display = "invalid value for `{}`: {}", key, msg)]
    Invalid { key: &'static str, msg: String },

    #[fail(display = "`{}` has {} entries, but the system has {} atoms", key, len, natoms)]
    WrongAtomCount { key: &'static str, len: usize, natoms: usize },

    #[fail(display = "`{}` refers to unknown atom tag {}", key, tag)]
    UnknownTag { key: &'static str, tag: u64 },
}

fn invalid(key: &'static str, msg: impl Into<String>) -> Error {
    SettingsError::Invalid { key, msg: msg.into() }.into()
}

fn check_positive(key: &'static str, value: f64) -> Result<(), Error> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(invalid(key, format!("{} (must be positive and finite)", value)));
    }
    Ok(())
}

impl Settings {
    pub fn validate(self) -> Result<ValidatedSettings, Error> {
        let nreplica = self.replicas.procs.len();
        check_replicas(&self.replicas)?;
        check_neb(&self.neb, nreplica)?;
        check_potential(&self.potential.soft)?;
        check_system(&self.system, nreplica)?;
        check_minimize(&self.minimize)?;

        let tags: HashSet<u64> = self.system.tags().into_iter().collect();
        if let Group::Tags(group) = &self.neb.group {
            for &tag in group {
                if !tags.contains(&tag) {
                    return Err(SettingsError::UnknownTag { key: "neb.group", tag }.into());
                }
            }
            if group.is_empty() {
                warn!("`neb.group` is empty; no atom will feel the path forces");
            }
        }

        let max_type = self.system.types.iter().cloned().max().unwrap_or(0);
        let has_diagonal = |t: usize| self.potential.soft.coeffs.iter().any(|c| c.types == [t, t]);
        for t in 0..=max_type {
            if !has_diagonal(t) {
                return Err(invalid("potential.soft.coeffs", format!("no coefficient for types [{}, {}]", t, t)));
            }
        }

        Ok(ValidatedSettings(self))
    }
}

fn check_replicas(replicas: &Replicas) -> Result<(), Error> {
    if replicas.procs.len() < 2 {
        return Err(invalid("replicas.procs", format!("need at least 2 replicas, found {}", replicas.procs.len())));
    }
    if replicas.procs.iter().any(|&n| n == 0) {
        return Err(invalid("replicas.procs", "every replica needs at least one process"));
    }
    Ok(())
}

fn check_neb(neb: &Neb, nreplica: usize) -> Result<(), Error> {
    check_positive("neb.spring-constant", neb.spring_constant)?;
    if let Some(climber) = neb.climbing_replica {
        if climber == 0 || climber + 1 >= nreplica {
            return Err(invalid(
                "neb.climbing-replica",
                format!("{} is not an interior replica of a chain of {}", climber, nreplica),
            ));
        }
    }
    if neb.energy_source.is_empty() {
        return Err(invalid("neb.energy-source", "empty name"));
    }
    Ok(())
}

fn check_potential(soft: &SoftPotential) -> Result<(), Error> {
    check_positive("potential.soft.cutoff", soft.cutoff)?;
    if soft.coeffs.is_empty() {
        return Err(invalid("potential.soft.coeffs", "no coefficients"));
    }
    for coeff in &soft.coeffs {
        if coeff.ramp().is_none() {
            return Err(invalid(
                "potential.soft.coeffs",
                format!("types {:?} need either `prefactor`, or both `start` and `stop`", coeff.types),
            ));
        }
        if let Some(cutoff) = coeff.cutoff {
            check_positive("potential.soft.coeffs.cutoff", cutoff)?;
        }
    }
    Ok(())
}

fn check_system(system: &System, nreplica: usize) -> Result<(), Error> {
    let natoms = system.natoms();
    if natoms == 0 {
        return Err(invalid("system.types", "no atoms"));
    }

    let check_len = |key, len| match len == natoms {
        true => Ok(()),
        false => Err(SettingsError::WrongAtomCount { key, len, natoms }),
    };
    check_len("system.initial", system.initial.len())?;
    check_len("system.final", system.final_.len())?;

    let tags = system.tags();
    check_len("system.tags", tags.len())?;
    let mut seen = HashSet::new();
    for &tag in &tags {
        if !seen.insert(tag) {
            return Err(invalid("system.tags", format!("tag {} appears more than once", tag)));
        }
    }
    for &tag in &system.frozen {
        if !seen.contains(&tag) {
            return Err(SettingsError::UnknownTag { key: "system.frozen", tag }.into());
        }
    }

    if let Some(images) = &system.images {
        if images.len() != nreplica {
            return Err(invalid(
                "system.images",
                format!("{} images given for {} replicas", images.len(), nreplica),
            ));
        }
        for image in images {
            check_len("system.images", image.len())?;
        }
        if images[0] != system.initial || images[nreplica - 1] != system.final_ {
            warn!("`system.images` disagrees with `initial`/`final` at the ends; the images win");
        }
    }

    for &period in system.periods.iter().flatten() {
        check_positive("system.periods", period)?;
    }
    Ok(())
}

fn check_minimize(minimize: &Minimize) -> Result<(), Error> {
    let fire = &minimize.fire;
    check_positive("minimize.fire.timestep-max", fire.timestep_max)?;
    check_positive("minimize.fire.mass", fire.mass)?;
    check_positive("minimize.fire.speedup-factor", fire.speedup_factor)?;
    check_positive("minimize.fire.slowdown-factor", fire.slowdown_factor)?;
    if !(0.0..=1.0).contains(&fire.damping_init) {
        return Err(invalid("minimize.fire.damping-init", format!("{} (must be within [0, 1])", fire.damping_init)));
    }
    if minimize.ftol < 0.0 || !minimize.ftol.is_finite() {
        return Err(invalid("minimize.ftol", format!("{}", minimize.ftol)));
    }
    if minimize.log_every == 0 {
        return Err(invalid("minimize.log-every", "must be at least 1"));
    }
    if minimize.max_iterations == 0 {
        warn!("`minimize.max-iterations` is 0; forces will be evaluated once");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{YamlRead, ValidatedSettings};

    fn with(patch: &str) -> Result<ValidatedSettings, serde_yaml::Error> {
        let mut base = serde_yaml::from_str::<serde_yaml::Value>("
neb:
  spring-constant: 1.0
replicas:
  procs: [1, 1, 1, 1]
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
").unwrap();

        // shallow merge of top-level sections
        let patch: serde_yaml::Value = serde_yaml::from_str(patch).unwrap();
        if let (Some(base), Some(patch)) = (base.as_mapping_mut(), patch.as_mapping()) {
            for (key, section) in patch {
                let merged = match (base.get(key).and_then(|v| v.as_mapping()), section.as_mapping()) {
                    (Some(old), Some(new)) => {
                        let mut old = old.clone();
                        for (k, v) in new {
                            old.insert(k.clone(), v.clone());
                        }
                        serde_yaml::Value::Mapping(old)
                    },
                    _ => section.clone(),
                };
                base.insert(key.clone(), merged);
            }
        }
        ValidatedSettings::from_value(base)
    }

    fn error_of(patch: &str) -> String {
        match with(patch) {
            Ok(_) => panic!("expected an error for {:?}", patch),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn base_is_valid() {
        with("{}").unwrap();
        with("neb: { climbing-replica: 2, group: [1] }").unwrap();
        with("system: { frozen: [2], periods: [10, null, null] }").unwrap();
    }

    #[test]
    fn rejects() {
        assert!(error_of("replicas: { procs: [1] }").contains("at least 2 replicas"));
        assert!(error_of("replicas: { procs: [1, 0] }").contains("replicas.procs"));
        assert!(error_of("neb: { spring-constant: 0 }").contains("neb.spring-constant"));
        assert!(error_of("neb: { climbing-replica: 0 }").contains("interior"));
        assert!(error_of("neb: { climbing-replica: 3 }").contains("interior"));
        assert!(error_of("neb: { group: [7] }").contains("unknown atom tag 7"));
        assert!(error_of("system: { frozen: [7] }").contains("unknown atom tag 7"));
        assert!(error_of("system: { tags: [4, 4] }").contains("more than once"));
        assert!(error_of("system: { final: [[0, 0, 0]] }").contains("system.final"));
        assert!(error_of("system: { images: [[[0, 0, 0], [1, 0, 0]]] }").contains("1 images given"));
        assert!(error_of("system: { types: [0, 1] }").contains("types [1, 1]"));
        assert!(error_of("minimize: { fire: { timestep-max: -1 } }").contains("timestep-max"));
        assert!(error_of("minimize: { log-every: 0 }").contains("log-every"));
        assert!(error_of("potential: { soft: { cutoff: 1, coeffs: [{ types: [0, 0], start: 1 }] } }").contains("both `start` and `stop`"));
    }

    #[test]
    fn typos_are_not_fatal() {
        // logged as a warning only
        with("neb: { sprint-constant: 3 }").unwrap();
    }
}
