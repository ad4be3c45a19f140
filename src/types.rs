//! Unix identifiers, permission bits and flag values, plus the native
//! Windows masks they are translated into.
//!
//! Values that cross the OS boundary (`AccessMask`, `FileAttributes`, the
//! console control events) are bit-identical to the Windows headers. The
//! rest only need to agree with this crate's own comparisons.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub type Pid = i32;
pub type Uid = i32;
pub type Gid = i32;

/// `mode_t` as the calling code sees it.
pub type RawMode = u16;

pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;
pub const STDERR_FILENO: i32 = 2;

/// Longest path the native platform accepts (UNC form).
pub const PATH_MAX: usize = 32_767;

/// `_PC_PATH_MAX`, the one `pathconf` name with a native answer.
pub const PC_PATH_MAX: i32 = 32_767;

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

/// Native console control events the two supported signals map onto.
pub const CTRL_C_EVENT: u32 = 0;
pub const CTRL_BREAK_EVENT: u32 = 1;

/// `STILL_ACTIVE`, the exit code a running process reports.
pub const STILL_ACTIVE: u32 = 259;

bitflags! {
    /// Permission triad plus the three special bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PermissionMode: RawMode {
        const OWNER_READ  = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC  = 0o100;
        const GROUP_READ  = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC  = 0o010;
        const OTHER_READ  = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXEC  = 0o001;

        const SET_UID = 0o4000;
        const SET_GID = 0o2000;
        const STICKY  = 0o1000;

        const OWNER_RWX = 0o700;
        const GROUP_RWX = 0o070;
        const OTHER_RWX = 0o007;
        const ALL_RWX   = 0o777;
        const ALL_READ  = 0o444;
        const ALL_WRITE = 0o222;
        const ALL_EXEC  = 0o111;
    }
}

impl PermissionMode {
    /// Keeps the bits that fit a mode and drops anything above `0o7777`.
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_truncate((raw & 0o7777) as RawMode)
    }

    /// Only the nine rwx bits; the part translation guarantees.
    pub fn triad(self) -> Self {
        self & Self::ALL_RWX
    }

    pub fn special(self) -> Self {
        self & (Self::SET_UID | Self::SET_GID | Self::STICKY)
    }
}

/// One rwx group of a mode, normalised to the `0o7` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Triad {
    Owner,
    Group,
    Other,
}

impl Triad {
    pub const ALL: [Triad; 3] = [Triad::Owner, Triad::Group, Triad::Other];

    pub const fn shift(self) -> u32 {
        match self {
            Triad::Owner => 6,
            Triad::Group => 3,
            Triad::Other => 0,
        }
    }

    /// `(read, write, execute)` for this group of `mode`.
    pub fn bits(self, mode: PermissionMode) -> (bool, bool, bool) {
        let v = (mode.bits() >> self.shift()) & 0o7;
        (v & 0o4 != 0, v & 0o2 != 0, v & 0o1 != 0)
    }

    pub fn mode(self, read: bool, write: bool, exec: bool) -> PermissionMode {
        let v = (read as RawMode) << 2 | (write as RawMode) << 1 | exec as RawMode;
        PermissionMode::from_bits_truncate(v << self.shift())
    }
}

// File type bits, in the values the native CRT uses.
pub const S_IFMT: u32 = 0xF000;
pub const S_IFIFO: u32 = 0x1000;
pub const S_IFCHR: u32 = 0x2000;
pub const S_IFDIR: u32 = 0x4000;
pub const S_IFBLK: u32 = 0x6000;
pub const S_IFREG: u32 = 0x8000;
pub const S_IFLNK: u32 = 0xA000;
pub const S_IFSOCK: u32 = 0xC000;

#[inline]
pub const fn s_istype(mode: u32, mask: u32) -> bool {
    mode & S_IFMT == mask
}

#[inline]
pub const fn s_isdir(mode: u32) -> bool {
    s_istype(mode, S_IFDIR)
}

#[inline]
pub const fn s_isreg(mode: u32) -> bool {
    s_istype(mode, S_IFREG)
}

bitflags! {
    /// `access()` checks. `X_OK` is read access: the native CRT has no
    /// execute check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessCheck: i32 {
        const R_OK = 0o4;
        const W_OK = 0o2;
        const X_OK = 0o4;
    }
}

/// `F_OK`: existence only.
pub const F_OK: i32 = 0;

bitflags! {
    /// Native file access rights, as granted in a DACL entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AccessMask: u32 {
        const FILE_GENERIC_READ    = 0x0012_0089;
        const FILE_GENERIC_WRITE   = 0x0012_0116;
        const FILE_GENERIC_EXECUTE = 0x0012_00A0;
        const GENERIC_ALL          = 0x1000_0000;

        const _ = !0;
    }
}

impl AccessMask {
    /// `true` only when every bit of `wanted` is granted; the generic
    /// file masks share `SYNCHRONIZE` and `READ_CONTROL`, so a partial
    /// overlap says nothing.
    #[inline]
    pub fn grants(self, wanted: AccessMask) -> bool {
        self.contains(wanted)
    }
}

bitflags! {
    /// Native file attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READONLY  = 0x0001;
        const HIDDEN    = 0x0002;
        const SYSTEM    = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE   = 0x0020;
        const NORMAL    = 0x0080;
    }
}

impl FileAttributes {
    /// Native attributes implied by `mode`.
    ///
    /// Known limitation: only the owner bits are consulted, and owner
    /// execute is read as "directory", which is only right when the target
    /// really is one. Group and other bits never influence the result.
    pub fn from_mode(mode: PermissionMode) -> Self {
        let mut attrs = FileAttributes::empty();
        if !mode.contains(PermissionMode::OWNER_WRITE) {
            attrs |= FileAttributes::READONLY;
        }
        if mode.contains(PermissionMode::OWNER_EXEC) {
            attrs |= FileAttributes::DIRECTORY;
        }
        if attrs.is_empty() { FileAttributes::NORMAL } else { attrs }
    }
}

bitflags! {
    /// `waitpid`/`waitid` options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WaitOptions: i32 {
        const NO_HANG = 1;
    }
}

/// `idtype_t` for `waitid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdClass {
    Pid,
    ProcessGroup,
    All,
}

pub const P_PID: i32 = 1;
pub const P_PGID: i32 = 2;
pub const P_ALL: i32 = 3;

impl IdClass {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            P_PID => Some(IdClass::Pid),
            P_PGID => Some(IdClass::ProcessGroup),
            P_ALL => Some(IdClass::All),
            _ => None,
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            IdClass::Pid => P_PID,
            IdClass::ProcessGroup => P_PGID,
            IdClass::All => P_ALL,
        }
    }
}

/// Outcome of a wait on one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitResult {
    Exited(i32),
    StillRunning,
}

impl WaitResult {
    pub fn exit_code(self) -> Option<i32> {
        match self {
            WaitResult::Exited(code) => Some(code),
            WaitResult::StillRunning => None,
        }
    }
}

/// The part of `siginfo_t` a handle-based platform can honestly fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdInfo {
    pub pid: Pid,
    pub status: i32,
}

/// Result of [`crate::process::ProcessController::spawn_and_wait`]: the
/// child has already exited when this exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnOutcome {
    pub pid: Pid,
    pub exit_code: i32,
}
