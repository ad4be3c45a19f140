use std::{
    os::unix::process::ExitStatusExt,
    process::Command,
};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
use nix::sys::wait::{Id, waitid};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{self, Pid as NixPid},
};

use crate::{
    ProcessBackend, Result, StraddleCode, StraddleError,
    process::{ControlEvent, SignalTarget},
    types::{Pid, SpawnOutcome, Uid, WaitResult},
};

/// Exit code a shell reports for a child killed by `sig`.
fn signaled(sig: i32) -> i32 {
    128 + sig
}

/// For a child of the caller, whether it has exited. Looks without
/// reaping so a later `wait` still sees the status. `None` when `pid` is
/// not our child.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn child_exited(pid: Pid) -> Result<Option<bool>> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(NixPid::from_raw(pid)), flags) {
        Ok(WaitStatus::StillAlive) => Ok(Some(false)),
        Ok(_) => Ok(Some(true)),
        Err(Errno::ECHILD) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// a zombie child still answers kill(pid, 0) here
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn child_exited(_pid: Pid) -> Result<Option<bool>> {
    Ok(None)
}

/// The host's own process calls. Only children of the caller can be
/// waited on, the same restriction `waitpid` always has here.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProcesses;

impl ProcessBackend for NativeProcesses {
    fn wait(&self, pid: Pid, block: bool) -> Result<WaitResult> {
        let flags = if block { None } else { Some(WaitPidFlag::WNOHANG) };
        let status = waitpid(NixPid::from_raw(pid), flags).map_err(|e| {
            let code = if e == Errno::ECHILD { StraddleCode::ResourceUnavailable } else { StraddleCode::Io };
            StraddleError::new(code).ctx(format_args!("waitpid({pid}): {e}")).os_code(e as i32)
        })?;
        Ok(match status {
            WaitStatus::Exited(_, code) => WaitResult::Exited(code),
            WaitStatus::Signaled(_, sig, _) => WaitResult::Exited(signaled(sig as i32)),
            _ => WaitResult::StillRunning,
        })
    }

    fn is_alive(&self, pid: Pid) -> Result<bool> {
        if let Some(exited) = child_exited(pid)? {
            return Ok(!exited);
        }
        match kill(NixPid::from_raw(pid), None) {
            Ok(()) => Ok(true),
            // exists, owned by someone else
            Err(Errno::EPERM) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn raise(&self, target: SignalTarget, event: ControlEvent) -> Result<()> {
        let sig = match event {
            ControlEvent::Interrupt => Signal::SIGINT,
            ControlEvent::Break => Signal::SIGTERM,
        };
        let pid = match target {
            SignalTarget::Group => NixPid::from_raw(0),
            SignalTarget::Process(pid) => NixPid::from_raw(pid),
        };
        kill(pid, sig).map_err(|e| {
            StraddleError::new(StraddleCode::Io)
                .ctx(format_args!("kill({pid}, {sig}): {e}"))
                .os_code(e as i32)
        })
    }

    fn spawn_and_wait(&self, command: &str) -> Result<SpawnOutcome> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|e| {
                let os = e.raw_os_error();
                let mut err = StraddleError::resource_unavailable(format_args!("spawn {command:?}: {e}"));
                err.os_code = os;
                err
            })?;
        let pid = child.id() as Pid;
        let status = child.wait()?;
        let exit_code = status
            .code()
            .or_else(|| status.signal().map(signaled))
            .unwrap_or(-1);
        Ok(SpawnOutcome { pid, exit_code })
    }

    fn current_uid(&self) -> Result<Uid> {
        Ok(unistd::getuid().as_raw() as Uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_on_a_stranger_is_resource_unavailable() {
        // pid 1 is never our child
        let e = NativeProcesses.wait(1, false).unwrap_err();
        assert!(e.is(StraddleCode::ResourceUnavailable));
        assert_eq!(e.raw_os_error(), Some(Errno::ECHILD as i32));
    }

    #[test]
    fn exited_child_is_dead_before_and_after_reaping() {
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id() as Pid;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while NativeProcesses.is_alive(pid).unwrap() {
            assert!(std::time::Instant::now() < deadline, "{pid} still alive");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // the look did not consume the status
        assert_eq!(NativeProcesses.wait(pid, true).unwrap(), WaitResult::Exited(0));
    }

    #[test]
    fn shell_exit_code_comes_back() {
        let out = NativeProcesses.spawn_and_wait("exit 5").unwrap();
        assert_eq!(out.exit_code, 5);
        assert!(out.pid > 0);
    }
}
