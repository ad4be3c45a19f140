//! Scoped ownership of raw native objects.
//!
//! Every SID, ACL, security descriptor and handle acquired by a backend is
//! wrapped in an [`Owned`] the moment the native call hands it over, so the
//! release runs exactly once on every exit path: normal return, `?`, or
//! unwinding.

/// A raw value plus the function that gives it back to the platform.
pub struct Owned<T: Copy> {
    raw: T,
    release: Option<fn(T)>,
}

impl<T: Copy> Owned<T> {
    #[must_use]
    #[inline]
    pub fn new(raw: T, release: fn(T)) -> Self {
        Self { raw, release: Some(release) }
    }

    #[inline]
    pub fn get(&self) -> T {
        self.raw
    }

    /// Hands ownership back to the caller; the release will not run.
    #[inline]
    pub fn into_raw(mut self) -> T {
        self.release = None;
        self.raw
    }
}

impl<T: Copy> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.raw);
        }
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Owned").field("raw", &self.raw).finish()
    }
}

/// Release functions and string plumbing shared by the Windows backends.
#[cfg(windows)]
pub(crate) mod win {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, LocalFree};

    use super::Owned;
    use crate::{Result, StraddleError};

    fn release_local<T>(p: *mut T) {
        if !p.is_null() {
            unsafe { LocalFree(p.cast()) };
        }
    }

    fn release_handle(h: HANDLE) {
        if !h.is_null() {
            unsafe { CloseHandle(h) };
        }
    }

    /// Memory the system allocated with `LocalAlloc` on our behalf.
    pub(crate) fn local<T>(p: *mut T) -> Owned<*mut T> {
        Owned::new(p, release_local::<T>)
    }

    pub(crate) fn handle(h: HANDLE) -> Owned<HANDLE> {
        Owned::new(h, release_handle)
    }

    /// NUL-terminated UTF-16; an interior NUL would silently truncate.
    pub(crate) fn wide(s: &OsStr) -> Result<Vec<u16>> {
        let mut out: Vec<u16> = s.encode_wide().collect();
        if out.contains(&0) {
            return Err(StraddleError::invalid_input("interior NUL in native string"));
        }
        out.push(0);
        Ok(out)
    }

    /// Copies a NUL-terminated UTF-16 string the system handed out.
    ///
    /// # Safety
    /// `p` must point at a NUL-terminated UTF-16 string.
    pub(crate) unsafe fn from_wide(p: *const u16) -> String {
        if p.is_null() {
            return String::new();
        }
        let mut len = 0usize;
        while unsafe { *p.add(len) } != 0 {
            len += 1;
        }
        String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(p, len) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static RELEASED: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    }

    fn record(v: u32) {
        RELEASED.with(|r| r.borrow_mut().push(v));
    }

    fn released() -> Vec<u32> {
        RELEASED.with(|r| r.borrow_mut().drain(..).collect())
    }

    fn three_step(fail_at: u32) -> Result<(), u32> {
        let _a = Owned::new(1u32, record);
        if fail_at == 1 {
            return Err(1);
        }
        let _b = Owned::new(2u32, record);
        if fail_at == 2 {
            return Err(2);
        }
        let _c = Owned::new(3u32, record);
        Ok(())
    }

    #[test]
    fn early_exit_releases_exactly_what_was_acquired() {
        assert_eq!(three_step(1), Err(1));
        assert_eq!(released(), vec![1]);

        assert_eq!(three_step(2), Err(2));
        assert_eq!(released(), vec![2, 1]);

        assert_eq!(three_step(0), Ok(()));
        assert_eq!(released(), vec![3, 2, 1]);
    }

    #[test]
    fn into_raw_skips_release() {
        let g = Owned::new(7u32, record);
        assert_eq!(g.get(), 7);
        assert_eq!(g.into_raw(), 7);
        assert!(released().is_empty());
    }
}
