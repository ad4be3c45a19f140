//! Pass-through backend for hosts whose native model already is the
//! permission triad.
//!
//! The access list is a view: reading synthesises it from `st_mode`
//! through the principal table, writing folds it back and `chmod`s.

use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::Path,
};

use log::debug;

use crate::{
    Result, SecurityBackend,
    perm::{AccessList, NodeInfo, PrincipalTable},
    types::{AccessMask, PermissionMode, Triad},
};

#[derive(Debug, Clone, Default)]
pub struct NativeSecurity {
    table: PrincipalTable,
}

impl NativeSecurity {
    pub fn new() -> Self { Self::default() }
    pub fn with_table(table: PrincipalTable) -> Self { Self { table } }

    fn to_list(&self, mode: PermissionMode) -> AccessList {
        let mut list = AccessList::default();
        for p in &self.table.privileged {
            list.push(p.clone(), AccessMask::GENERIC_ALL);
        }
        for triad in Triad::ALL {
            if let Some(p) = self.table.principal_for(triad) {
                list.push(p.clone(), self.table.mask_for(triad, mode));
            }
        }
        list
    }

    fn to_mode(&self, list: &AccessList) -> PermissionMode {
        Triad::ALL.into_iter().fold(PermissionMode::empty(), |mode, triad| {
            match self.table.principal_for(triad) {
                Some(p) => mode | self.table.mode_for(triad, list.rights_for(p)),
                None => mode,
            }
        })
    }
}

impl SecurityBackend for NativeSecurity {
    fn metadata(&self, path: &Path) -> Result<NodeInfo> {
        Ok(NodeInfo::from(&fs::metadata(path)?))
    }

    fn read_access_list(&self, path: &Path) -> Result<AccessList> {
        let mode = PermissionMode::from_raw(fs::metadata(path)?.mode());
        Ok(self.to_list(mode))
    }

    fn replace_access_list(&self, path: &Path, list: &AccessList, _protect: bool) -> Result<()> {
        let mode = self.to_mode(list);
        debug!("chmod {:o} {}", mode.bits(), path.display());
        fs::set_permissions(path, fs::Permissions::from_mode(u32::from(mode.bits())))?;
        Ok(())
    }
}
