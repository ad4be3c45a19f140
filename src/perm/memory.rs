//! In-memory security backend, for tests and for embedders that keep
//! their own permission store.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use crate::{
    Result, SecurityBackend, StraddleError,
    perm::{AccessList, NodeInfo, NodeKind},
};

#[derive(Debug, Default)]
struct Node {
    info: Option<NodeInfo>,
    list: AccessList,
    protect: Option<bool>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<PathBuf, Node>,
    fail_reads: bool,
    fail_replace: bool,
}

#[derive(Debug, Default)]
pub struct MemorySecurity {
    state: Mutex<State>,
}

impl MemorySecurity {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned store is still a consistent map
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert_file(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), NodeKind::File);
    }

    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), NodeKind::Dir);
    }

    fn insert(&self, path: &Path, kind: NodeKind) {
        let info = NodeInfo { kind, len: 0, modified: None };
        self.lock().nodes.entry(path.to_path_buf()).or_default().info = Some(info);
    }

    /// Makes every following `read_access_list` fail.
    pub fn fail_reads(&self, on: bool) {
        self.lock().fail_reads = on;
    }

    /// Makes every following `replace_access_list` fail without touching
    /// the stored list.
    pub fn fail_replace(&self, on: bool) {
        self.lock().fail_replace = on;
    }

    pub fn access_list(&self, path: impl AsRef<Path>) -> Option<AccessList> {
        self.lock().nodes.get(path.as_ref()).map(|n| n.list.clone())
    }

    /// The `protect` flag of the last successful replace.
    pub fn last_protect(&self, path: impl AsRef<Path>) -> Option<bool> {
        self.lock().nodes.get(path.as_ref()).and_then(|n| n.protect)
    }
}

fn not_found(path: &Path) -> StraddleError {
    StraddleError::io(io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
}

impl SecurityBackend for MemorySecurity {
    fn metadata(&self, path: &Path) -> Result<NodeInfo> {
        self.lock()
            .nodes
            .get(path)
            .and_then(|n| n.info)
            .ok_or_else(|| not_found(path))
    }

    fn read_access_list(&self, path: &Path) -> Result<AccessList> {
        let state = self.lock();
        if state.fail_reads {
            return Err(StraddleError::resource_unavailable(format_args!(
                "access list of {} (injected)",
                path.display()
            )));
        }
        state.nodes.get(path).map(|n| n.list.clone()).ok_or_else(|| not_found(path))
    }

    fn replace_access_list(&self, path: &Path, list: &AccessList, protect: bool) -> Result<()> {
        let mut state = self.lock();
        if state.fail_replace {
            return Err(StraddleError::resource_unavailable(format_args!(
                "replace access list of {} (injected)",
                path.display()
            )));
        }
        let node = state.nodes.get_mut(path).ok_or_else(|| not_found(path))?;
        node.list = list.clone();
        node.protect = Some(protect);
        Ok(())
    }
}
