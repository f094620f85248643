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

use crate::Tag;
use crate::comm::Rank;

/// Every error kind raised by this crate.
///
/// None of these are recoverable.  A run that hits one of them must stop, since
/// continuing would silently pair up the wrong atoms across replicas.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum NebError {
    // ---- configuration, caught by `NebFix::initialize` ----

    #[fail(display = "Potential energy ID for fix neb does not exist: {:?}", _0)]
    MissingEnergySource(String),

    #[fail(display = "Invalid spring constant for fix neb: {} (must be positive and finite)", _0)]
    BadSpringConstant(f64),

    #[fail(display = "Invalid climbing replica {} for a chain of {} replicas (must be an interior replica)", replica, nreplica)]
    BadClimbingReplica { replica: usize, nreplica: usize },

    #[fail(display = "A NEB chain needs at least 2 replicas, found {}", _0)]
    TooFewReplicas(usize),

    #[fail(display = "Inconsistent replica layout: {}", _0)]
    BadLayout(String),

    #[fail(display = "Direct exchange requested, but {}", _0)]
    DirectExchangeUnavailable(String),

    // ---- invariants, caught on every call ----

    #[fail(display = "Atom count changed in fix neb (from {} to {})", initial, current)]
    AtomCountChanged { initial: u64, current: u64 },

    #[fail(display = "NEB atom count differs between replicas: {:?}", _0)]
    NebAtomCountMismatch(Vec<u64>),

    #[fail(display = "Total atom count differs between replicas: {:?}", _0)]
    AtomCountMismatch(Vec<u64>),

    #[fail(display = "Atom {} is not present in the list reported by the {} replica", tag, direction)]
    IdentityMismatch { tag: Tag, direction: &'static str },

    #[fail(display = "Atom {} appears more than once in the list reported by the {} replica", tag, direction)]
    DuplicateIdentity { tag: Tag, direction: &'static str },

    // ---- communication ----

    #[fail(display = "Malformed message from rank {}: {}", source, what)]
    MalformedMessage { source: Rank, what: String },

    #[fail(display = "Rank {} hung up", _0)]
    PeerHungUp(Rank),

    #[fail(display = "Run aborted by another process")]
    Aborted,
}
