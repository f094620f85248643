//! End-to-end path searches on the local backend.
//!
//! A single mobile atom hops between two frozen atoms.  The saddle point sits exactly
//! between them, where the energy is `2 (1 + cos(0.6 pi))`.

use pretty_assertions::assert_eq;
use rsp2_replica::{NebError, PathReport};
use rsp2_tasks::{run_neb, ValidatedSettings, YamlRead};

const HOP: &str = "
neb:
  spring-constant: 1.0
  climbing-replica: 2
replicas:
  procs: [1, 2, 1, 3, 1]
potential:
  soft:
    cutoff: 1.0
    coeffs:
      - { types: [0, 0], prefactor: 1.0 }
system:
  types: [0, 0, 0]
  tags: [7, 8, 9]
  initial: [[0, 0.6, 0], [0, -0.6, 0], [-1.5, 0, 0]]
  final:   [[0, 0.6, 0], [0, -0.6, 0], [1.5, 0, 0]]
  images:
    - [[0, 0.6, 0], [0, -0.6, 0], [-1.5, 0, 0]]
    - [[0, 0.6, 0], [0, -0.6, 0], [-0.75, 0.05, 0]]
    - [[0, 0.6, 0], [0, -0.6, 0], [0.1, -0.08, 0]]
    - [[0, 0.6, 0], [0, -0.6, 0], [0.75, 0.05, 0]]
    - [[0, 0.6, 0], [0, -0.6, 0], [1.5, 0, 0]]
  frozen: [7, 8]
minimize:
  fire: { timestep-max: 0.1 }
  ftol: 1.0e-5
  max-iterations: 5000
  log-every: 500
";

fn saddle_energy() -> f64 { 2.0 * (1.0 + f64::cos(0.6 * std::f64::consts::PI)) }

fn settings(yaml: &str) -> ValidatedSettings {
    let _ = env_logger::try_init();
    ValidatedSettings::from_reader(yaml.as_bytes()).unwrap()
}

fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "{} != {} (tol {})", a, b, tol);
}

fn check_hop(report: &PathReport) {
    assert_eq!(report.nreplica(), 5);
    assert_eq!(report.highest_replica, 2);

    // fixed endpoints never move, and are out of range of the frozen atoms
    assert_eq!(report.energy[0], 0.0);
    assert_eq!(report.energy[4], 0.0);

    // the climbing image found the saddle, off-axis displacements relaxed away
    assert_close(report.energy[2], saddle_energy(), 1e-3);
    assert_close(report.energy[1], report.energy[3], 1e-3);
    assert_close(report.forward_barrier, saddle_energy(), 1e-3);
    assert_close(report.reverse_barrier, saddle_energy(), 1e-3);

    // springs spread the images evenly
    for (i, &s) in report.reaction_coordinate.iter().enumerate() {
        assert_close(s, 0.25 * i as f64, 1e-2);
    }
    for w in report.reaction_coordinate.windows(2) {
        assert!(w[0] < w[1]);
    }
}

#[test]
fn climbing_image_finds_the_saddle() {
    let report = run_neb(&settings(HOP)).unwrap();
    check_hop(&report);

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"forward-barrier\""));
    assert!(json.contains("\"reaction-coordinate\""));
}

#[test]
fn decomposition_does_not_change_the_path() {
    // one process per replica selects the direct exchange
    let direct = run_neb(&settings(&HOP.replace("procs: [1, 2, 1, 3, 1]", "procs: [1, 1, 1, 1, 1]"))).unwrap();
    check_hop(&direct);

    let gathered = run_neb(&settings(HOP)).unwrap();
    for (a, b) in direct.energy.iter().zip(&gathered.energy) {
        assert_close(*a, *b, 1e-4);
    }
}

#[test]
fn forced_gather_on_single_process_replicas() {
    let yaml = HOP
        .replace("procs: [1, 2, 1, 3, 1]", "procs: [1, 1, 1, 1, 1]")
        .replace("climbing-replica: 2", "climbing-replica: 2\n  exchange: gather");
    check_hop(&run_neb(&settings(&yaml)).unwrap());
}

#[test]
fn direct_exchange_is_refused_when_replicas_are_split() {
    let yaml = HOP.replace("climbing-replica: 2", "climbing-replica: 2\n  exchange: direct");
    let e = run_neb(&settings(&yaml)).unwrap_err();
    match e.downcast_ref::<NebError>() {
        Some(NebError::DirectExchangeUnavailable(_)) => {},
        _ => panic!("unexpected error: {}", e),
    }
}

#[test]
fn bad_settings_are_rejected_before_running() {
    let yaml = HOP.replace("climbing-replica: 2", "climbing-replica: 4");
    let e = ValidatedSettings::from_reader(yaml.as_bytes()).unwrap_err();
    assert!(e.to_string().contains("interior"), "{}", e);

    let yaml = HOP.replace("frozen: [7, 8]", "frozen: [7, 80]");
    assert!(ValidatedSettings::from_reader(yaml.as_bytes()).is_err());
}

#[test]
fn unknown_energy_source_fails_every_process() {
    let yaml = HOP.replace("climbing-replica: 2", "climbing-replica: 2\n  energy-source: c_pe");
    let e = run_neb(&settings(&yaml)).unwrap_err();
    assert_eq!(e.downcast_ref::<NebError>(), Some(&NebError::MissingEnergySource("c_pe".to_string())));
}
