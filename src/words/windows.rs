use std::ffi::OsStr;

use windows_sys::Win32::UI::Shell::CommandLineToArgvW;

use crate::{
    Result, StraddleCode, StraddleError,
    guard::win,
    words::WRDE_NOSPACE,
};

/// Tokenizes with `CommandLineToArgvW` and copies every word out before
/// the native array is freed.
pub(super) fn command_line_to_argv(line: &str) -> Result<Vec<String>> {
    let wide = win::wide(OsStr::new(line))?;
    let mut argc = 0i32;
    let argv = unsafe { CommandLineToArgvW(wide.as_ptr(), &mut argc) };
    if argv.is_null() {
        let mut e = StraddleError::last_os_error(StraddleCode::ResourceUnavailable, "CommandLineToArgvW");
        e.os_code = e.os_code.or(Some(WRDE_NOSPACE));
        return Err(e);
    }
    let argv = win::local(argv);

    let words = (0..argc.max(0) as usize)
        .map(|i| unsafe { win::from_wide(*argv.get().add(i)) })
        .collect();
    Ok(words)
}
