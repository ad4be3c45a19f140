use std::{ffi::OsString, fs, os::windows::ffi::OsStringExt, path::{Path, PathBuf}, ptr};

use windows_sys::Win32::{
    Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError},
    Storage::FileSystem::{GetVolumeInformationW, GetVolumePathNameW},
    System::LibraryLoader::GetModuleFileNameW,
};

use crate::{Result, StraddleCode, StraddleError, guard::win, types::PATH_MAX};

/// Maximum component length of the volume `path` lives on.
pub(super) fn max_component_len(path: &Path) -> Result<i64> {
    // the volume lookup succeeds for paths that do not exist
    fs::metadata(path)?;

    let name = win::wide(path.as_os_str())?;
    let mut root = vec![0u16; PATH_MAX + 1];
    if unsafe { GetVolumePathNameW(name.as_ptr(), root.as_mut_ptr(), root.len() as u32) } == 0 {
        return Err(StraddleError::last_os_error(
            StraddleCode::Io,
            format_args!("GetVolumePathNameW({})", path.display()),
        ));
    }

    let mut max_component = 0u32;
    let ok = unsafe {
        GetVolumeInformationW(
            root.as_ptr(),
            ptr::null_mut(),
            0,
            ptr::null_mut(),
            &mut max_component,
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        )
    };
    if ok == 0 {
        return Err(StraddleError::last_os_error(
            StraddleCode::Io,
            format_args!("GetVolumeInformationW({})", path.display()),
        ));
    }
    Ok(i64::from(max_component))
}

/// `GetModuleFileNameW` for the executable, growing the buffer until the
/// name fits.
pub(super) fn module_file_name() -> Result<PathBuf> {
    let mut buf = vec![0u16; 260];
    loop {
        let n = unsafe { GetModuleFileNameW(ptr::null_mut(), buf.as_mut_ptr(), buf.len() as u32) } as usize;
        if n == 0 {
            return Err(StraddleError::last_os_error(StraddleCode::Io, "GetModuleFileNameW"));
        }
        let truncated = n == buf.len() && unsafe { GetLastError() } == ERROR_INSUFFICIENT_BUFFER;
        if !truncated {
            return Ok(PathBuf::from(OsString::from_wide(&buf[..n])));
        }
        if buf.len() > PATH_MAX {
            return Err(StraddleError::resource_unavailable("executable path longer than PATH_MAX"));
        }
        buf.resize(buf.len() * 2, 0);
    }
}
