use std::path::Path;

use crate::{
    Result,
    perm::{AccessList, NodeInfo, Principal},
    process::{ControlEvent, SignalTarget},
    types::{Pid, SpawnOutcome, Uid, WaitResult},
};

/// Where a path's discretionary access list lives.
pub trait SecurityBackend {
    fn metadata(&self, path: &Path) -> Result<NodeInfo>;

    fn read_access_list(&self, path: &Path) -> Result<AccessList>;

    /// Swaps the whole list in one native call. With `protect` set,
    /// inherited entries are not carried over.
    fn replace_access_list(&self, path: &Path, list: &AccessList, protect: bool) -> Result<()>;

    /// Whether `a` and `b` name the same native identity. Grants to the
    /// same identity merge in the list, so a table row that is also
    /// privileged always reads back as full access.
    fn same_principal(&self, a: &Principal, b: &Principal) -> Result<bool> {
        Ok(a == b)
    }
}

/// Native process handles, seen through Unix-shaped questions.
pub trait ProcessBackend {
    /// Open `pid`, then either poll once (`block == false`) or wait for exit.
    fn wait(&self, pid: Pid, block: bool) -> Result<WaitResult>;

    fn is_alive(&self, pid: Pid) -> Result<bool>;

    fn raise(&self, target: SignalTarget, event: ControlEvent) -> Result<()>;

    /// Start suspended, resume, block until the child exits.
    fn spawn_and_wait(&self, command: &str) -> Result<SpawnOutcome>;

    fn current_uid(&self) -> Result<Uid>;
}
