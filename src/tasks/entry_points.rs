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
use crate::logging::GlobalLogger;

use clap::{App, Arg, ArgMatches};
use path_abs::PathFile;
use rsp2_replica::PathReport;
use rsp2_tasks_config::{ValidatedSettings, YamlRead};

fn wrap_result_main<F>(main: F)
where F: FnOnce() -> FailResult<()>,
{
    main().unwrap_or_else(|e| {
        crate::logging::log_causes(&e);

        if crate::env::backtrace() {
            error!("{}", e.backtrace());
        } else {
            error!("\
                (If you found the above error message to be particularly lacking in \
                detail, try again with RUST_BACKTRACE=1)\
            ");
        }
        std::process::exit(1);
    });
}

fn app<'a, 'b>(name: &'a str) -> App<'a, 'b> {
    App::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relax a chain of replicas into a minimum energy path with the nudged elastic band method.")
        .args(&[
            Arg::with_name("config")
                .short("c").long("config").value_name("CONFIG")
                .required(true).takes_value(true)
                .help("settings yaml"),
            Arg::with_name("output")
                .short("o").long("output").value_name("SUMMARY")
                .takes_value(true)
                .help("write the final path report here as json"),
            Arg::with_name("log")
                .long("log").value_name("FILE")
                .takes_value(true)
                .help("also write the log to this file"),
            Arg::with_name("verbose")
                .short("v").long("verbose").multiple(true)
                .help("more log output (repeatable)"),
            Arg::with_name("mpi")
                .long("mpi")
                .help("run on MPI, one replica process per rank, instead of on local threads"),
        ])
}

fn read_settings(m: &ArgMatches<'_>) -> FailResult<ValidatedSettings> {
    let path = match m.value_of("config") {
        Some(path) => PathFile::new(path)?,
        None => bail!("--config is required"),
    };
    let text = path.read_string()?;
    Ok(ValidatedSettings::from_reader(text.as_bytes())?)
}

/// Install the logger and run.  Only one process in the job returns a report.
fn run(m: &ArgMatches<'_>, logger: &mut GlobalLogger) -> FailResult<Option<PathReport>> {
    match m.is_present("mpi") {
        #[cfg(feature = "mpi-support")]
        true => {
            use ::mpi::topology::Communicator;

            let universe = match ::mpi::initialize() {
                Some(universe) => universe,
                None => bail!("MPI was already initialized"),
            };
            let world = universe.world();
            logger.rank(world.rank() as usize).apply()?;

            let settings = read_settings(m)?;
            crate::driver::run_neb_mpi(&settings, &world)
        },
        #[cfg(not(feature = "mpi-support"))]
        true => {
            logger.apply()?;
            bail!("--mpi requires rsp2 to be built with the 'mpi-support' feature")
        },
        false => {
            logger.apply()?;
            let settings = read_settings(m)?;
            crate::driver::run_neb(&settings).map(Some)
        },
    }
}

fn write_summary(path: &str, report: &PathReport) -> FailResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    PathFile::create(path)?.write_str(&json)?;
    info!("wrote {}", path);
    Ok(())
}

// -------------------------------------------------------------------------------------

// %% CRATES: binary: rsp2-neb %%
pub fn rsp2_neb() {
    wrap_result_main(|| {
        let matches = app("rsp2-neb").get_matches();

        let mut logger = GlobalLogger::default();
        logger.verbosity(matches.occurrences_of("verbose") as i32);
        if let Some(path) = matches.value_of("log") {
            logger.path(path);
        }

        let report = run(&matches, &mut logger)?;
        if let (Some(path), Some(report)) = (matches.value_of("output"), report.as_ref()) {
            write_summary(path, report)?;
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_shape() {
        let m = app("rsp2-neb").get_matches_from(vec!["rsp2-neb", "-c", "x.yaml", "-vv", "--mpi"]);
        assert_eq!(m.value_of("config"), Some("x.yaml"));
        assert_eq!(m.occurrences_of("verbose"), 2);
        assert!(m.is_present("mpi"));
        assert!(m.value_of("output").is_none());

        assert!(app("rsp2-neb").get_matches_from_safe(vec!["rsp2-neb"]).is_err());
    }

    #[test]
    fn summary_is_json() {
        use rsp2_replica::PathStats;

        let stats = [
            PathStats { energy: 0.0, ..Default::default() },
            PathStats { energy: 2.0, plen: 1.0, ..Default::default() },
            PathStats { energy: 0.5, plen: 1.0, ..Default::default() },
        ];
        let report = PathReport::from_stats(&stats);

        let path = std::env::temp_dir().join(format!("rsp2-neb-summary-{}.json", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        write_summary(&path, &report).unwrap();

        let text = PathFile::new(&path).unwrap().read_string().unwrap();
        std::fs::remove_file(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["highest-replica"], 1);
        assert_eq!(value["reverse-barrier"], 1.5);
    }
}
