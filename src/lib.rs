//! # STRADDLE
//! Unix-shaped process, permission and word-splitting calls on a platform
//! that speaks handles, access lists and native command lines.
//!
//! To "straddle" is to stand with a foot on each side. Calling code keeps
//! its `chmod`/`stat`, `waitpid`/`kill` and `wordexp` habits; this crate
//! translates each call into the native model, runs it, and hands back a
//! Unix-shaped answer. On Unix hosts every call passes straight through, so
//! call sites never branch on platform.
//!
//! ## Components
//! * **Permission translation** ([`perm`]): a mode becomes a fresh,
//!   protected DACL built from an explicit principal table, and is read
//!   back from the effective rights of the same principals.
//! * **Process control** ([`process`]): waits, liveness probes and the two
//!   console-deliverable signals over per-call process handles, plus a
//!   synchronous spawn that returns only once the child has exited.
//! * **Word splitting** ([`words`]): `wordexp` without a shell; anything
//!   needing globbing, quoting or substitution is refused.
//! * **Host queries** ([`host`]): `pathconf`, `setenv` and the path of the
//!   running executable.
//!
//! Native objects never outlive the call that acquired them; see [`guard`].
//!

pub mod error;
pub mod guard;
pub mod host;
pub mod perm;
pub mod process;
pub mod traits;
pub mod types;
pub mod words;

pub use error::*;
pub use traits::*;
pub use types::*;

#[cfg(any(unix, windows))]
pub use perm::{apply_permissions, query_permissions};
#[cfg(any(unix, windows))]
pub use process::{
    current_uid, probe_process, signal_process, spawn_and_wait, wait_for_id_class, wait_for_process,
};
pub use words::{WordVector, split_words};
#[cfg(any(unix, windows))]
pub use host::{path_conf, path_conf_raw};
pub use host::{executable_path, set_env};
