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

#[macro_use] extern crate failure;
#[macro_use] extern crate log;

pub type FailResult<T> = Result<T, failure::Error>;

mod env;
mod logging;
mod engine;
mod minimize;
mod driver;

pub mod entry_points;

pub use crate::engine::{Engine, InitialAtom, Parts, SetForceZero, ENERGY_SOURCE, FROZEN, NEB_GROUP};
pub use crate::minimize::{fire, FireOutcome};
pub use crate::driver::{build_potential, run_neb, run_process};
#[cfg(feature = "mpi-support")]
pub use crate::driver::run_neb_mpi;
pub use crate::logging::GlobalLogger;

pub use rsp2_tasks_config::{self as config, ValidatedSettings, YamlRead};
