use std::{fmt, io};

use liaise::{Liaise, RegisterErrors};

#[derive(RegisterErrors, Debug, Copy, Clone, PartialEq, Eq)]
#[error_prefix = "STRD"]
pub enum StraddleCode {
    Io = 1,
    ResourceUnavailable = 2,
    Unsupported = 3,
    InvalidInput = 4,
    PartialFailure = 5,
}

impl Liaise for StraddleCode {
    fn code_id(self) -> u16 { self as u16 }

    fn message(self) -> &'static str {
        match self {
            Self::Io => "I/O error",
            Self::ResourceUnavailable => "Resource unavailable",
            Self::Unsupported => "Unsupported operation",
            Self::InvalidInput => "Invalid input",
            Self::PartialFailure => "Partial failure",
        }
    }
}

/// Concrete runtime error type for the crate.
///
/// Every Unix-shaped call reports failure through this one type: a stable
/// `liaise` code for the category, free-form context, and the raw native
/// error when the platform produced one.
#[derive(Debug)]
pub struct StraddleError {
    pub code: StraddleCode,
    pub ctx: Option<String>,

    /// `GetLastError()` / `errno` value, or a `WRDE_*` code from the splitter.
    pub os_code: Option<i32>,

    pub source: Option<StraddleSource>,
}

#[derive(Debug)]
pub enum StraddleSource {
    Io(io::Error),
    Cause(Box<StraddleError>),
}

pub type Result<T> = core::result::Result<T, StraddleError>;

impl StraddleError {
    #[inline]
    pub fn new(code: StraddleCode) -> Self {
        Self { code, ctx: None, os_code: None, source: None }
    }

    #[inline]
    pub fn ctx(mut self, ctx: impl fmt::Display) -> Self {
        self.ctx = Some(ctx.to_string());
        self
    }

    #[inline]
    pub fn os_code(mut self, code: i32) -> Self {
        self.os_code = Some(code);
        self
    }

    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self {
            code: StraddleCode::Io,
            ctx: Some(err.to_string()),
            os_code: err.raw_os_error(),
            source: Some(StraddleSource::Io(err)),
        }
    }

    /// Captures the calling thread's last native error under `code`.
    #[inline]
    pub fn last_os_error(code: StraddleCode, what: impl fmt::Display) -> Self {
        let err = io::Error::last_os_error();
        Self {
            code,
            ctx: Some(format!("{what}: {err}")),
            os_code: err.raw_os_error(),
            source: Some(StraddleSource::Io(err)),
        }
    }

    /// A native status code returned directly (not through the thread's
    /// last-error slot), as the security APIs do.
    #[inline]
    pub fn status(code: StraddleCode, what: impl fmt::Display, status: u32) -> Self {
        let err = io::Error::from_raw_os_error(status as i32);
        Self {
            code,
            ctx: Some(format!("{what}: {err}")),
            os_code: Some(status as i32),
            source: Some(StraddleSource::Io(err)),
        }
    }

    #[inline]
    pub fn resource_unavailable(what: impl fmt::Display) -> Self {
        Self::new(StraddleCode::ResourceUnavailable).ctx(what)
    }

    #[inline]
    pub fn unsupported(what: impl fmt::Display) -> Self {
        Self::new(StraddleCode::Unsupported).ctx(what)
    }

    #[inline]
    pub fn invalid_input(what: impl fmt::Display) -> Self {
        Self::new(StraddleCode::InvalidInput).ctx(what)
    }

    /// Wraps `cause` after an earlier step of a multi-step sequence already
    /// mutated observable state.
    #[inline]
    pub fn partial_failure(what: impl fmt::Display, cause: StraddleError) -> Self {
        Self {
            code: StraddleCode::PartialFailure,
            ctx: Some(format!("{what}: {cause}")),
            os_code: cause.os_code,
            source: Some(StraddleSource::Cause(Box::new(cause))),
        }
    }

    #[inline]
    pub fn raw_os_error(&self) -> Option<i32> {
        self.os_code
    }

    #[inline]
    pub fn is(&self, code: StraddleCode) -> bool {
        self.code == code
    }

    /// The C-shaped failure sentinel every translated call returns.
    #[inline]
    pub const fn sentinel() -> i32 {
        -1
    }
}

impl fmt::Display for StraddleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // "[STRD0002] Resource unavailable: OpenProcess(42): ..."
        let base = self.code.render();
        match &self.ctx {
            Some(ctx) => write!(f, "{base}: {ctx}"),
            None => write!(f, "{base}"),
        }
    }
}

impl std::error::Error for StraddleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(StraddleSource::Io(e)) => Some(e),
            Some(StraddleSource::Cause(e)) => Some(e.as_ref()),
            None => None,
        }
    }
}

impl From<io::Error> for StraddleError {
    #[inline]
    fn from(e: io::Error) -> Self {
        StraddleError::io(e)
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for StraddleError {
    fn from(e: nix::errno::Errno) -> Self {
        StraddleError::io(io::Error::from_raw_os_error(e as i32))
    }
}
