//! Unix permission triads over discretionary access lists.
//!
//! A mode is written as a fresh, protected access list: full access for the
//! privileged principals, then one entry per row of the [`PrincipalTable`]
//! carrying that row's read/write/execute bits as generic file rights.
//! Reading goes the other way: the rights granted to each table principal
//! are OR-ed together and a bit is reported only when the whole generic
//! mask is present.

use std::{
    fs,
    path::Path,
    time::SystemTime,
};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    Result, SecurityBackend, StraddleError,
    types::{AccessMask, PermissionMode, S_IFDIR, S_IFREG, Triad},
};

pub mod memory;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use self::unix::NativeSecurity;
#[cfg(windows)]
pub use self::windows::NativeSecurity;

/// An identity that can hold an entry in an access list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    /// `NT AUTHORITY\SYSTEM`
    System,
    /// `BUILTIN\Administrators`
    Administrators,
    /// The user of the calling process token.
    CurrentUser,
    /// `BUILTIN\Users`
    Members,
    /// `Everyone` (S-1-1-0)
    Everyone,
    /// Any other SID, by its string form.
    Unmapped(String),
}

/// Which principal stands in for which rwx group, and who always gets
/// full control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalTable {
    pub rows: [(Principal, Triad); 3],
    pub privileged: Vec<Principal>,
}

impl Default for PrincipalTable {
    fn default() -> Self {
        Self {
            rows: [
                (Principal::CurrentUser, Triad::Owner),
                (Principal::Members, Triad::Group),
                (Principal::Everyone, Triad::Other),
            ],
            privileged: vec![Principal::System, Principal::Administrators],
        }
    }
}

impl PrincipalTable {
    pub fn principal_for(&self, triad: Triad) -> Option<&Principal> {
        self.rows.iter().find(|(_, t)| *t == triad).map(|(p, _)| p)
    }

    /// Native rights for one group of `mode`.
    pub fn mask_for(&self, triad: Triad, mode: PermissionMode) -> AccessMask {
        let (r, w, x) = triad.bits(mode);
        let mut mask = AccessMask::empty();
        if r {
            mask |= AccessMask::FILE_GENERIC_READ;
        }
        if w {
            mask |= AccessMask::FILE_GENERIC_WRITE;
        }
        if x {
            mask |= AccessMask::FILE_GENERIC_EXECUTE;
        }
        mask
    }

    /// Mode bits recovered from the rights `triad`'s principal holds.
    pub fn mode_for(&self, triad: Triad, rights: AccessMask) -> PermissionMode {
        if rights.contains(AccessMask::GENERIC_ALL) {
            return triad.mode(true, true, true);
        }
        triad.mode(
            rights.grants(AccessMask::FILE_GENERIC_READ),
            rights.grants(AccessMask::FILE_GENERIC_WRITE),
            rights.grants(AccessMask::FILE_GENERIC_EXECUTE),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub principal: Principal,
    pub mask: AccessMask,
}

/// Ordered grant entries, the portable form of a DACL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    pub entries: Vec<AccessEntry>,
}

impl AccessList {
    pub fn push(&mut self, principal: Principal, mask: AccessMask) {
        self.entries.push(AccessEntry { principal, mask });
    }

    /// Everything granted to `principal`, across all of its entries.
    pub fn rights_for(&self, principal: &Principal) -> AccessMask {
        self.entries
            .iter()
            .filter(|e| &e.principal == principal)
            .fold(AccessMask::empty(), |acc, e| acc | e.mask)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Dir,
    Other,
}

/// Standard metadata, before permission bits are folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl From<&fs::Metadata> for NodeInfo {
    fn from(md: &fs::Metadata) -> Self {
        let kind = if md.is_dir() {
            NodeKind::Dir
        } else if md.is_file() {
            NodeKind::File
        } else {
            NodeKind::Other
        };
        Self { kind, len: md.len(), modified: md.modified().ok() }
    }
}

/// The augmented stat record `query` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// `st_mode`: file type bits plus permission bits.
    pub mode: u32,
    pub permissions: PermissionMode,
    pub kind: NodeKind,
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// `false` when the access list could not be read and the permission
    /// bits were left cleared.
    pub acl_readable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub table: PrincipalTable,
    /// Write the list as protected so inherited entries are dropped.
    pub protect: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self { table: PrincipalTable::default(), protect: true }
    }
}

/// `chmod`/`stat` over any [`SecurityBackend`].
#[derive(Debug)]
pub struct PermissionTranslator<B: SecurityBackend> {
    backend: B,
    cfg: TranslatorConfig,
}

impl<B: SecurityBackend> PermissionTranslator<B> {
    pub fn new(backend: B) -> Self { Self::with_config(backend, TranslatorConfig::default()) }
    pub fn with_config(backend: B, cfg: TranslatorConfig) -> Self { Self { backend, cfg } }

    pub fn backend(&self) -> &B { &self.backend }
    pub fn config(&self) -> &TranslatorConfig { &self.cfg }

    /// The list `apply` would write for `mode`.
    pub fn build_access_list(&self, mode: PermissionMode) -> AccessList {
        let table = &self.cfg.table;
        let mut list = AccessList::default();
        for p in &table.privileged {
            list.push(p.clone(), AccessMask::GENERIC_ALL);
        }
        for (principal, triad) in &table.rows {
            list.push(principal.clone(), table.mask_for(*triad, mode));
        }
        list
    }

    /// Owner/group/other bits recovered from `list`.
    pub fn fold(&self, list: &AccessList) -> PermissionMode {
        let table = &self.cfg.table;
        table.rows.iter().fold(PermissionMode::empty(), |mode, (principal, triad)| {
            let rights = list.rights_for(principal);
            trace!("{principal:?} holds {rights:?} for {triad:?}");
            mode | table.mode_for(*triad, rights)
        })
    }

    /// Groups whose table principal is also a privileged principal. The
    /// privileged full-access grant lands on the same identity, so these
    /// groups read back as rwx whatever mode was applied. This is the
    /// case for a process running as `SYSTEM`, whose token user is the
    /// SYSTEM SID.
    pub fn pinned_triads(&self) -> Result<Vec<Triad>> {
        let table = &self.cfg.table;
        let mut pinned = Vec::new();
        for (principal, triad) in &table.rows {
            for privileged in &table.privileged {
                if self.backend.same_principal(principal, privileged)? {
                    pinned.push(*triad);
                    break;
                }
            }
        }
        Ok(pinned)
    }

    /// The permission bits `query` reports after `apply(path, mode)`.
    pub fn effective_mode(&self, mode: PermissionMode) -> Result<PermissionMode> {
        Ok(self
            .pinned_triads()?
            .into_iter()
            .fold(mode.triad(), |m, triad| m | triad.mode(true, true, true)))
    }

    /// `chmod(path, mode)`: replaces the access list of `path`.
    ///
    /// Groups reported by [`Self::pinned_triads`] keep full access; the
    /// call still succeeds and logs the difference at `warn`.
    pub fn apply(&self, path: &Path, mode: PermissionMode) -> Result<()> {
        if mode.special() != PermissionMode::empty() {
            debug!("special bits {:o} on {} are not translated", mode.special().bits(), path.display());
        }
        let effective = self.effective_mode(mode)?;
        if effective != mode.triad() {
            warn!(
                "{:o} on {} will read back as {:o}: a privileged principal stands in for an rwx group",
                mode.triad().bits(),
                path.display(),
                effective.bits()
            );
        }
        let list = self.build_access_list(mode);
        debug!("apply {:o} to {} ({} entries)", mode.triad().bits(), path.display(), list.len());
        self.backend.replace_access_list(path, &list, self.cfg.protect)
    }

    /// `stat(path)` with owner/group/other bits read back from the access
    /// list.
    ///
    /// An unreadable access list is not an error: the record comes back
    /// with every permission bit cleared and `acl_readable == false`.
    pub fn query(&self, path: &Path) -> Result<FileStat> {
        let node = self.backend.metadata(path)?;

        let (permissions, acl_readable) = match self.backend.read_access_list(path) {
            Ok(list) => (self.fold(&list), true),
            Err(e) => {
                warn!("access list of {} unreadable, reporting no permissions: {e}", path.display());
                (PermissionMode::empty(), false)
            }
        };

        let type_bits = match node.kind {
            NodeKind::Dir => S_IFDIR,
            NodeKind::File => S_IFREG,
            NodeKind::Other => 0,
        };

        debug!("query {} -> {:o}", path.display(), permissions.bits());
        Ok(FileStat {
            mode: type_bits | u32::from(permissions.bits()),
            permissions,
            kind: node.kind,
            len: node.len,
            modified: node.modified,
            acl_readable,
        })
    }

    /// `mkdir(path, mode)`.
    pub fn create_dir(&self, path: &Path, mode: PermissionMode) -> Result<()> {
        fs::create_dir(path)?;
        self.apply(path, mode).map_err(|e| {
            StraddleError::partial_failure(format_args!("created {} but left its permissions", path.display()), e)
        })
    }

    /// `open(path, O_CREAT | O_RDWR, mode)`; the file is closed again
    /// before the mode is applied.
    pub fn create_file(&self, path: &Path, mode: PermissionMode) -> Result<()> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        self.apply(path, mode).map_err(|e| {
            StraddleError::partial_failure(format_args!("opened {} but left its permissions", path.display()), e)
        })
    }
}

#[cfg(any(unix, windows))]
impl PermissionTranslator<NativeSecurity> {
    /// Translator over this host's native security model.
    pub fn native() -> Self {
        Self::native_with_config(TranslatorConfig::default())
    }

    pub fn native_with_config(cfg: TranslatorConfig) -> Self {
        let backend = NativeSecurity::with_table(cfg.table.clone());
        Self::with_config(backend, cfg)
    }
}

/// `chmod` with the default table on the native backend.
#[cfg(any(unix, windows))]
pub fn apply_permissions(path: impl AsRef<Path>, mode: PermissionMode) -> Result<()> {
    PermissionTranslator::native().apply(path.as_ref(), mode)
}

/// `stat` with the default table on the native backend.
#[cfg(any(unix, windows))]
pub fn query_permissions(path: impl AsRef<Path>) -> Result<FileStat> {
    PermissionTranslator::native().query(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::memory::MemorySecurity;
    use std::path::PathBuf;

    fn mode(bits: u16) -> PermissionMode {
        PermissionMode::from_bits_truncate(bits)
    }

    #[test]
    fn build_lists_privileged_first_then_table_rows() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let list = t.build_access_list(mode(0o640));

        let principals: Vec<_> = list.entries.iter().map(|e| e.principal.clone()).collect();
        assert_eq!(
            principals,
            vec![
                Principal::System,
                Principal::Administrators,
                Principal::CurrentUser,
                Principal::Members,
                Principal::Everyone,
            ]
        );
        assert_eq!(list.entries[0].mask, AccessMask::GENERIC_ALL);
        assert_eq!(list.entries[1].mask, AccessMask::GENERIC_ALL);
        assert_eq!(
            list.entries[2].mask,
            AccessMask::FILE_GENERIC_READ | AccessMask::FILE_GENERIC_WRITE
        );
        assert_eq!(list.entries[3].mask, AccessMask::FILE_GENERIC_READ);
        assert!(list.entries[4].mask.is_empty());
    }

    #[test]
    fn fold_ignores_privileged_entries() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let list = t.build_access_list(mode(0o000));
        assert_eq!(t.fold(&list), PermissionMode::empty());
    }

    #[test]
    fn fold_merges_split_entries_for_one_principal() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let mut list = AccessList::default();
        list.push(Principal::Members, AccessMask::FILE_GENERIC_READ);
        list.push(Principal::Members, AccessMask::FILE_GENERIC_EXECUTE);
        list.push(Principal::Unmapped("S-1-5-21-1-2-3-1001".into()), AccessMask::GENERIC_ALL);
        assert_eq!(t.fold(&list).bits(), 0o050);
    }

    #[test]
    fn fold_needs_the_whole_generic_mask() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let mut list = AccessList::default();
        // SYNCHRONIZE | READ_CONTROL only: shared by all three generic masks
        list.push(Principal::CurrentUser, AccessMask::from_bits_retain(0x0012_0000));
        assert_eq!(t.fold(&list), PermissionMode::empty());
    }

    #[test]
    fn generic_all_on_a_row_principal_reads_as_rwx() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let mut list = AccessList::default();
        list.push(Principal::Everyone, AccessMask::GENERIC_ALL);
        assert_eq!(t.fold(&list).bits(), 0o007);
    }

    #[test]
    fn table_rows_are_swappable() {
        let mut cfg = TranslatorConfig::default();
        cfg.table.rows[1].0 = Principal::Unmapped("S-1-5-32-547".into());
        let t = PermissionTranslator::with_config(MemorySecurity::new(), cfg);

        let list = t.build_access_list(mode(0o070));
        assert_eq!(
            list.rights_for(&Principal::Unmapped("S-1-5-32-547".into())),
            AccessMask::FILE_GENERIC_READ | AccessMask::FILE_GENERIC_WRITE | AccessMask::FILE_GENERIC_EXECUTE
        );
        assert!(list.rights_for(&Principal::Members).is_empty());
        assert_eq!(t.fold(&list).bits(), 0o070);
    }

    #[test]
    fn apply_then_query_round_trips_triads() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("C:/data/file.txt");
        t.backend().insert_file(&p);

        for bits in [0o000, 0o400, 0o200, 0o100, 0o440, 0o660, 0o770, 0o777] {
            t.apply(&p, mode(bits)).unwrap();
            let st = t.query(&p).unwrap();
            assert_eq!(st.permissions.bits(), bits, "mode {bits:o}");
            assert_eq!(st.mode, S_IFREG | u32::from(bits));
            assert!(st.acl_readable);
        }
    }

    fn owner_is_system() -> TranslatorConfig {
        let mut cfg = TranslatorConfig::default();
        cfg.table.rows[0].0 = Principal::System;
        cfg
    }

    #[test]
    fn privileged_owner_is_pinned_to_rwx() {
        let t = PermissionTranslator::with_config(MemorySecurity::new(), owner_is_system());
        assert_eq!(t.pinned_triads().unwrap(), vec![Triad::Owner]);
        assert_eq!(t.effective_mode(mode(0o000)).unwrap().bits(), 0o700);
        assert_eq!(t.effective_mode(mode(0o640)).unwrap().bits(), 0o740);

        let plain = PermissionTranslator::new(MemorySecurity::new());
        assert!(plain.pinned_triads().unwrap().is_empty());
        assert_eq!(plain.effective_mode(mode(0o4640)).unwrap().bits(), 0o640);
    }

    #[test]
    fn privileged_owner_reads_back_the_effective_mode() {
        let t = PermissionTranslator::with_config(MemorySecurity::new(), owner_is_system());
        let p = PathBuf::from("C:/ProgramData/agent/state.json");
        t.backend().insert_file(&p);

        for bits in [0o000, 0o400, 0o660, 0o777] {
            t.apply(&p, mode(bits)).unwrap();
            let st = t.query(&p).unwrap();
            assert_eq!(st.permissions, t.effective_mode(mode(bits)).unwrap(), "mode {bits:o}");
            // group and other are unaffected
            assert_eq!(st.permissions.bits() & 0o077, bits & 0o077);
        }
    }

    #[test]
    fn special_bits_do_not_round_trip() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("/srv/tool");
        t.backend().insert_file(&p);

        t.apply(&p, mode(0o4755)).unwrap();
        assert_eq!(t.query(&p).unwrap().permissions.bits(), 0o755);
    }

    #[test]
    fn apply_replaces_instead_of_merging() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("/srv/file");
        t.backend().insert_file(&p);

        t.apply(&p, mode(0o777)).unwrap();
        t.apply(&p, mode(0o400)).unwrap();
        assert_eq!(t.query(&p).unwrap().permissions.bits(), 0o400);
        assert_eq!(t.backend().access_list(&p).unwrap().len(), 5);
        assert_eq!(t.backend().last_protect(&p), Some(true));
    }

    #[test]
    fn applying_twice_matches_applying_once() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("/srv/twice");
        t.backend().insert_file(&p);

        t.apply(&p, mode(0o640)).unwrap();
        let once = t.query(&p).unwrap();
        t.apply(&p, mode(0o640)).unwrap();
        let twice = t.query(&p).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unreadable_list_reports_success_with_no_bits() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("/srv/locked");
        t.backend().insert_dir(&p);
        t.apply(&p, mode(0o755)).unwrap();

        t.backend().fail_reads(true);
        let st = t.query(&p).unwrap();
        assert_eq!(st.permissions, PermissionMode::empty());
        assert_eq!(st.mode, S_IFDIR);
        assert!(!st.acl_readable);
    }

    #[test]
    fn missing_path_is_an_error() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let e = t.query(Path::new("/nope")).unwrap_err();
        assert!(e.is(crate::StraddleCode::Io));
    }

    #[test]
    fn failed_apply_leaves_previous_list() {
        let t = PermissionTranslator::new(MemorySecurity::new());
        let p = PathBuf::from("/srv/keep");
        t.backend().insert_file(&p);
        t.apply(&p, mode(0o644)).unwrap();

        t.backend().fail_replace(true);
        let e = t.apply(&p, mode(0o000)).unwrap_err();
        assert!(e.is(crate::StraddleCode::ResourceUnavailable));
        assert_eq!(t.query(&p).unwrap().permissions.bits(), 0o644);
    }

    #[test]
    fn create_dir_reports_partial_failure_when_apply_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let t = PermissionTranslator::new(MemorySecurity::new());
        t.backend().fail_replace(true);

        let dir = scratch.path().join("made");
        let e = t.create_dir(&dir, mode(0o750)).unwrap_err();
        assert!(e.is(crate::StraddleCode::PartialFailure));
        assert!(dir.is_dir());
    }

    #[test]
    fn create_file_applies_mode() {
        let scratch = tempfile::tempdir().unwrap();
        let t = PermissionTranslator::new(MemorySecurity::new());
        let file = scratch.path().join("made.txt");
        t.backend().insert_file(&file);

        t.create_file(&file, mode(0o600)).unwrap();
        assert!(file.is_file());
        assert_eq!(t.query(&file).unwrap().permissions.bits(), 0o600);
    }
}
