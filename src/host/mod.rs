//! `pathconf`, `setenv` and the one `readlink` callers rely on: the path
//! of the running executable.

use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{Result, StraddleError, types::PC_PATH_MAX};

#[cfg(windows)]
mod windows;

/// Path-dependent limits `path_conf` can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConf {
    /// `_PC_PATH_MAX`
    PathMax,
}

impl PathConf {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            PC_PATH_MAX => Some(PathConf::PathMax),
            _ => None,
        }
    }
}

/// `pathconf(path, name)`. `None` means the host sets no limit.
///
/// On Windows the answer is the maximum component length of the volume
/// holding `path`.
#[cfg(any(unix, windows))]
pub fn path_conf(path: impl AsRef<Path>, name: PathConf) -> Result<Option<i64>> {
    let path = path.as_ref();
    let limit = match name {
        PathConf::PathMax => native_path_max(path)?,
    };
    debug!("pathconf({}, {name:?}) -> {limit:?}", path.display());
    Ok(limit)
}

/// [`path_conf`] for a raw `_PC_*` name; anything but `PC_PATH_MAX` is
/// `Unsupported`.
#[cfg(any(unix, windows))]
pub fn path_conf_raw(path: impl AsRef<Path>, raw: i32) -> Result<Option<i64>> {
    let name = PathConf::from_raw(raw)
        .ok_or_else(|| StraddleError::unsupported(format_args!("pathconf name {raw}")))?;
    path_conf(path, name)
}

#[cfg(unix)]
fn native_path_max(path: &Path) -> Result<Option<i64>> {
    use nix::unistd::{PathconfVar, pathconf};
    let limit = pathconf(path, PathconfVar::PATH_MAX).map_err(|e| {
        StraddleError::new(crate::StraddleCode::Io)
            .ctx(format_args!("pathconf({}): {e}", path.display()))
            .os_code(e as i32)
    })?;
    Ok(limit.map(i64::from))
}

#[cfg(windows)]
fn native_path_max(path: &Path) -> Result<Option<i64>> {
    windows::max_component_len(path).map(Some)
}

fn check_env_name(name: &OsStr) -> Result<()> {
    let bytes = name.as_encoded_bytes();
    if bytes.is_empty() || bytes.contains(&b'=') || bytes.contains(&0) {
        return Err(StraddleError::invalid_input(format_args!("environment name {name:?}")));
    }
    Ok(())
}

/// `setenv(name, value, overwrite)`. With `overwrite == false` an existing
/// variable is left as it is and the call still succeeds.
///
/// The process environment is shared by every thread; callers serialize
/// this against other environment access.
pub fn set_env(name: impl AsRef<OsStr>, value: impl AsRef<OsStr>, overwrite: bool) -> Result<()> {
    let (name, value) = (name.as_ref(), value.as_ref());
    check_env_name(name)?;
    if value.as_encoded_bytes().contains(&0) {
        return Err(StraddleError::invalid_input(format_args!("NUL in value of {name:?}")));
    }
    if !overwrite && env::var_os(name).is_some() {
        debug!("setenv {name:?}: kept existing value");
        return Ok(());
    }
    // SAFETY: name and value are free of NUL and '='; concurrent access
    // to the environment is excluded by the caller.
    unsafe { env::set_var(name, value) };
    Ok(())
}

/// `readlink` as it is used: the full path of the running executable.
#[cfg(windows)]
pub fn executable_path() -> Result<PathBuf> {
    windows::module_file_name()
}

/// `readlink` as it is used: the full path of the running executable.
#[cfg(not(windows))]
pub fn executable_path() -> Result<PathBuf> {
    Ok(env::current_exe()?)
}
