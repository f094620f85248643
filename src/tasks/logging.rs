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

use log::{Level, LevelFilter};
use std::fmt;
use std::path::{Path, PathBuf};

/// Builder-style setup for logging
#[derive(Debug, Clone, Default)]
pub struct GlobalLogger {
    path: Option<PathBuf>,
    verbosity: Verbosity,
    rank: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Verbosity { Default, Loud, Louder }

impl Default for Verbosity {
    fn default() -> Self { Verbosity::Default }
}

impl GlobalLogger {
    /// Also write the log to a file.
    pub fn path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self
    { self.path = Some(path.as_ref().to_owned()); self }

    /// World rank of this process, when running on MPI.
    ///
    /// Rank 0 writes to the given log file; every other rank gets its own file,
    /// suffixed by its rank.
    pub fn rank(&mut self, rank: usize) -> &mut Self
    { self.rank = rank; self }

    fn file_path(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        match self.rank {
            0 => Some(path.clone()),
            rank => {
                let mut name = path.as_os_str().to_owned();
                name.push(format!(".{}", rank));
                Some(PathBuf::from(name))
            },
        }
    }

    /// Any integer will be accepted; the level will be truncated
    /// to the most extreme value supported.
    pub fn verbosity(&mut self, level: i32) -> &mut Self
    {
        self.verbosity = match level {
            std::i32::MIN..=0 => Verbosity::Default,
            1 => Verbosity::Loud,
            _ => Verbosity::Louder,
        };
        self
    }

    /// NOTE: Calling this more than once is an error, as the `log` facade only
    ///       accepts one logger per process.
    pub fn apply(&mut self) -> FailResult<()>
    {Ok({
        use std::time::Instant;

        let show_target = crate::env::log_mod()?;
        let ours = match self.verbosity {
            Verbosity::Default => LevelFilter::Info,
            Verbosity::Loud => LevelFilter::Debug,
            Verbosity::Louder => LevelFilter::Trace,
        };

        let start = Instant::now();
        let mut fern = fern::Dispatch::new();
        fern = fern.format(move |out, message, record| {
                let t = start.elapsed();
                let thread = std::thread::current();
                let thread = thread.name().unwrap_or("main");
                match show_target {
                    true => out.finish(format_args!("[{:>4}.{:03}s][{}][{}][{}] {}",
                        t.as_secs(),
                        t.subsec_nanos() / 1_000_000,
                        thread,
                        record.target(),
                        ColorizedLevel(record.level()),
                        message)),
                    false => out.finish(format_args!("[{:>4}.{:03}s][{}][{}] {}",
                        t.as_secs(),
                        t.subsec_nanos() / 1_000_000,
                        thread,
                        ColorizedLevel(record.level()),
                        message)),
                }
            })
            .level(LevelFilter::Warn)
            .level_for("rsp2_tasks", ours)
            .level_for("rsp2_tasks_config", ours)
            .level_for("rsp2_replica", ours)
            .level_for("rsp2_potentials", ours)
            .chain(std::io::stdout());

        if let Some(path) = self.file_path() {
            fern = fern.chain(fern::log_file(path)?);
        }

        fern.apply()?;
    })}
}

/// Log an error along with everything that caused it.
pub fn log_causes(e: &failure::Error) {
    for line in cause_lines(e) {
        error!("{}", line);
    }
}

fn cause_lines(e: &failure::Error) -> Vec<String> {
    e.iter_chain().map(|cause| cause.to_string()).collect()
}

#[derive(Debug, Copy, Clone)]
pub struct ColorizedLevel(pub Level);
impl fmt::Display for ColorizedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match self.0 {
            Level::Error => ansi_term::Colour::Red.bold(),
            Level::Warn  => ansi_term::Colour::Red.normal(),
            Level::Info  => ansi_term::Colour::Cyan.bold(),
            Level::Debug => ansi_term::Colour::Yellow.dimmed(),
            Level::Trace => ansi_term::Colour::Cyan.normal(),
        };
        write!(f, "{}", style.paint(format!("{:<5}", self.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_saturates() {
        let mut logger = GlobalLogger::default();
        assert_eq!(logger.verbosity(-3).verbosity, Verbosity::Default);
        assert_eq!(logger.verbosity(1).verbosity, Verbosity::Loud);
        assert_eq!(logger.verbosity(40).verbosity, Verbosity::Louder);
    }

    #[test]
    fn every_rank_gets_its_own_log_file() {
        let mut logger = GlobalLogger::default();
        assert_eq!(logger.file_path(), None);

        logger.path("out/neb.log");
        assert_eq!(logger.file_path(), Some(PathBuf::from("out/neb.log")));
        assert_eq!(logger.rank(3).file_path(), Some(PathBuf::from("out/neb.log.3")));
        assert_eq!(logger.rank(0).file_path(), Some(PathBuf::from("out/neb.log")));
    }

    #[test]
    fn causes_are_listed_outermost_first() {
        use failure::ResultExt;

        let result: Result<(), failure::Error> = {
            Err(format_err!("peer 3 is gone"))
                .context("while exchanging with the next replica")
                .map_err(failure::Error::from)
        };
        let e = result.unwrap_err();
        assert_eq!(cause_lines(&e), vec![
            "while exchanging with the next replica".to_string(),
            "peer 3 is gone".to_string(),
        ]);
    }

    #[test]
    fn colorized_level_keeps_the_name() {
        assert!(ColorizedLevel(Level::Warn).to_string().contains("WARN"));
    }
}
