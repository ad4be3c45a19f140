//! `waitpid`, `waitid`, `kill` and a synchronous spawn over native
//! process handles.
//!
//! A process is either running or exited with a code. Waits observe that
//! state: a polling wait (`WaitOptions::NO_HANG`) looks once and returns,
//! a blocking wait suspends the caller until the transition. Handles are
//! opened and closed inside each call; nothing is cached between calls.

use log::debug;

use crate::{
    ProcessBackend, Result, StraddleError,
    types::{
        CTRL_BREAK_EVENT, CTRL_C_EVENT, IdClass, IdInfo, Pid, SIGINT, SIGTERM, SpawnOutcome,
        Uid, WaitOptions, WaitResult,
    },
};

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use self::unix::NativeProcesses;
#[cfg(windows)]
pub use self::windows::NativeProcesses;

/// The console control events the supported signals are carried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// `SIGINT`, delivered as `CTRL_C_EVENT`.
    Interrupt,
    /// `SIGTERM`, delivered as `CTRL_BREAK_EVENT`.
    Break,
}

impl ControlEvent {
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGINT => Some(ControlEvent::Interrupt),
            SIGTERM => Some(ControlEvent::Break),
            _ => None,
        }
    }

    pub const fn native(self) -> u32 {
        match self {
            ControlEvent::Interrupt => CTRL_C_EVENT,
            ControlEvent::Break => CTRL_BREAK_EVENT,
        }
    }

    pub const fn signal(self) -> i32 {
        match self {
            ControlEvent::Interrupt => SIGINT,
            ControlEvent::Break => SIGTERM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// `kill(0, sig)`: every process in the caller's group.
    Group,
    Process(Pid),
}

fn check_pid(pid: Pid) -> Result<()> {
    if pid <= 0 {
        return Err(StraddleError::invalid_input(format_args!("pid {pid} does not name one process")));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ProcessController<B: ProcessBackend> {
    backend: B,
}

impl<B: ProcessBackend> ProcessController<B> {
    pub fn new(backend: B) -> Self { Self { backend } }

    pub fn backend(&self) -> &B { &self.backend }

    /// `waitpid(pid, &status, options)`.
    pub fn wait_for_process(&self, pid: Pid, options: WaitOptions) -> Result<WaitResult> {
        check_pid(pid)?;
        let block = !options.contains(WaitOptions::NO_HANG);
        debug!("wait for {pid} (block: {block})");
        self.backend.wait(pid, block)
    }

    /// `waitid(class, id, &info, options)`. Only `IdClass::Pid` has a
    /// native mapping. `None` means polled and still running.
    pub fn wait_for_id_class(&self, class: IdClass, id: Pid, options: WaitOptions) -> Result<Option<IdInfo>> {
        if class != IdClass::Pid {
            return Err(StraddleError::unsupported(format_args!("waitid on id class {class:?}")));
        }
        Ok(match self.wait_for_process(id, options)? {
            WaitResult::Exited(status) => Some(IdInfo { pid: id, status }),
            WaitResult::StillRunning => None,
        })
    }

    /// [`Self::wait_for_id_class`] for a raw `idtype_t`.
    pub fn wait_for_raw_id_class(&self, raw: i32, id: Pid, options: WaitOptions) -> Result<Option<IdInfo>> {
        let class = IdClass::from_raw(raw)
            .ok_or_else(|| StraddleError::unsupported(format_args!("waitid on id class {raw}")))?;
        self.wait_for_id_class(class, id, options)
    }

    /// `kill(pid, signal)` for `SIGINT` and `SIGTERM`; `pid == 0` reaches
    /// the whole process group.
    pub fn signal_process(&self, pid: Pid, signal: i32) -> Result<()> {
        let event = ControlEvent::from_signal(signal)
            .ok_or_else(|| StraddleError::unsupported(format_args!("signal {signal}")))?;
        let target = match pid {
            0 => SignalTarget::Group,
            p if p > 0 => SignalTarget::Process(p),
            p => return Err(StraddleError::unsupported(format_args!("signal to process group {}", -p))),
        };
        debug!("raise {event:?} on {target:?}");
        self.backend.raise(target, event)
    }

    /// Liveness probe: `true` while `pid` names a running process.
    pub fn probe_process(&self, pid: Pid) -> Result<bool> {
        check_pid(pid)?;
        self.backend.is_alive(pid)
    }

    /// Runs `command` to completion. The call returns only after the child
    /// has exited; it is not a fork.
    pub fn spawn_and_wait(&self, command: &str) -> Result<SpawnOutcome> {
        if command.trim().is_empty() {
            return Err(StraddleError::invalid_input("empty command line"));
        }
        if command.contains('\0') {
            return Err(StraddleError::invalid_input("NUL in command line"));
        }
        let outcome = self.backend.spawn_and_wait(command)?;
        debug!("{command:?} ran as {} and exited with {}", outcome.pid, outcome.exit_code);
        Ok(outcome)
    }

    /// `getuid()`.
    pub fn current_uid(&self) -> Result<Uid> {
        self.backend.current_uid()
    }
}

#[cfg(any(unix, windows))]
impl ProcessController<NativeProcesses> {
    pub fn native() -> Self {
        Self::new(NativeProcesses)
    }
}

#[cfg(any(unix, windows))]
pub fn wait_for_process(pid: Pid, options: WaitOptions) -> Result<WaitResult> {
    ProcessController::native().wait_for_process(pid, options)
}

#[cfg(any(unix, windows))]
pub fn wait_for_id_class(class: IdClass, id: Pid, options: WaitOptions) -> Result<Option<IdInfo>> {
    ProcessController::native().wait_for_id_class(class, id, options)
}

#[cfg(any(unix, windows))]
pub fn signal_process(pid: Pid, signal: i32) -> Result<()> {
    ProcessController::native().signal_process(pid, signal)
}

#[cfg(any(unix, windows))]
pub fn probe_process(pid: Pid) -> Result<bool> {
    ProcessController::native().probe_process(pid)
}

#[cfg(any(unix, windows))]
pub fn spawn_and_wait(command: &str) -> Result<SpawnOutcome> {
    ProcessController::native().spawn_and_wait(command)
}

#[cfg(any(unix, windows))]
pub fn current_uid() -> Result<Uid> {
    ProcessController::native().current_uid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StraddleCode;
    use std::{cell::RefCell, collections::HashMap};

    /// Scripted process table; records every raised event.
    #[derive(Default)]
    struct Scripted {
        procs: HashMap<Pid, WaitResult>,
        raised: RefCell<Vec<(SignalTarget, ControlEvent)>>,
        waits: RefCell<Vec<(Pid, bool)>>,
    }

    impl Scripted {
        fn with(procs: &[(Pid, WaitResult)]) -> Self {
            Self { procs: procs.iter().copied().collect(), ..Default::default() }
        }
    }

    impl ProcessBackend for Scripted {
        fn wait(&self, pid: Pid, block: bool) -> Result<WaitResult> {
            self.waits.borrow_mut().push((pid, block));
            let state = *self
                .procs
                .get(&pid)
                .ok_or_else(|| StraddleError::resource_unavailable(format_args!("OpenProcess({pid})")))?;
            Ok(match (state, block) {
                // a blocking wait only returns once the process is gone
                (WaitResult::StillRunning, true) => WaitResult::Exited(0),
                (s, _) => s,
            })
        }

        fn is_alive(&self, pid: Pid) -> Result<bool> {
            Ok(matches!(self.procs.get(&pid), Some(WaitResult::StillRunning)))
        }

        fn raise(&self, target: SignalTarget, event: ControlEvent) -> Result<()> {
            self.raised.borrow_mut().push((target, event));
            Ok(())
        }

        fn spawn_and_wait(&self, _command: &str) -> Result<SpawnOutcome> {
            Ok(SpawnOutcome { pid: 4242, exit_code: 7 })
        }

        fn current_uid(&self) -> Result<Uid> {
            Ok(1001)
        }
    }

    #[test]
    fn no_hang_polls_without_blocking() {
        let c = ProcessController::new(Scripted::with(&[
            (10, WaitResult::StillRunning),
            (11, WaitResult::Exited(3)),
        ]));
        assert_eq!(c.wait_for_process(10, WaitOptions::NO_HANG).unwrap(), WaitResult::StillRunning);
        assert_eq!(c.wait_for_process(11, WaitOptions::NO_HANG).unwrap(), WaitResult::Exited(3));
        assert_eq!(c.wait_for_process(10, WaitOptions::empty()).unwrap(), WaitResult::Exited(0));
        assert_eq!(*c.backend().waits.borrow(), vec![(10, false), (11, false), (10, true)]);
    }

    #[test]
    fn unknown_pid_is_resource_unavailable() {
        let c = ProcessController::new(Scripted::default());
        let e = c.wait_for_process(99, WaitOptions::NO_HANG).unwrap_err();
        assert!(e.is(StraddleCode::ResourceUnavailable));
    }

    #[test]
    fn non_positive_pid_is_invalid() {
        let c = ProcessController::new(Scripted::default());
        assert!(c.wait_for_process(0, WaitOptions::empty()).unwrap_err().is(StraddleCode::InvalidInput));
        assert!(c.probe_process(-4).unwrap_err().is(StraddleCode::InvalidInput));
    }

    #[test]
    fn id_class_wait_reports_pid_and_status_only() {
        let c = ProcessController::new(Scripted::with(&[(20, WaitResult::Exited(9))]));
        let info = c.wait_for_id_class(IdClass::Pid, 20, WaitOptions::NO_HANG).unwrap();
        assert_eq!(info, Some(IdInfo { pid: 20, status: 9 }));
    }

    #[test]
    fn id_class_wait_polled_while_running_is_none() {
        let c = ProcessController::new(Scripted::with(&[(21, WaitResult::StillRunning)]));
        assert_eq!(c.wait_for_id_class(IdClass::Pid, 21, WaitOptions::NO_HANG).unwrap(), None);
    }

    #[test]
    fn group_and_all_classes_are_unsupported() {
        let c = ProcessController::new(Scripted::with(&[(20, WaitResult::Exited(0))]));
        for class in [IdClass::ProcessGroup, IdClass::All] {
            let e = c.wait_for_id_class(class, 20, WaitOptions::empty()).unwrap_err();
            assert!(e.is(StraddleCode::Unsupported));
        }
        let e = c.wait_for_raw_id_class(77, 20, WaitOptions::empty()).unwrap_err();
        assert!(e.is(StraddleCode::Unsupported));
        assert!(c.backend().waits.borrow().is_empty());
    }

    #[test]
    fn pid_zero_broadcasts_to_the_group() {
        let c = ProcessController::new(Scripted::default());
        c.signal_process(0, SIGINT).unwrap();
        c.signal_process(31, SIGTERM).unwrap();
        assert_eq!(
            *c.backend().raised.borrow(),
            vec![
                (SignalTarget::Group, ControlEvent::Interrupt),
                (SignalTarget::Process(31), ControlEvent::Break),
            ]
        );
    }

    #[test]
    fn other_signals_are_unsupported() {
        let c = ProcessController::new(Scripted::default());
        for sig in [0, 1, 9, 10, 17] {
            let e = c.signal_process(31, sig).unwrap_err();
            assert!(e.is(StraddleCode::Unsupported), "signal {sig}");
        }
        let e = c.signal_process(-31, SIGTERM).unwrap_err();
        assert!(e.is(StraddleCode::Unsupported));
        assert!(c.backend().raised.borrow().is_empty());
    }

    #[test]
    fn control_events_carry_native_values() {
        assert_eq!(ControlEvent::Interrupt.native(), 0);
        assert_eq!(ControlEvent::Break.native(), 1);
        assert_eq!(ControlEvent::from_signal(SIGTERM).map(ControlEvent::signal), Some(SIGTERM));
    }

    #[test]
    fn spawn_and_wait_rejects_empty_commands() {
        let c = ProcessController::new(Scripted::default());
        assert!(c.spawn_and_wait("   ").unwrap_err().is(StraddleCode::InvalidInput));
        assert!(c.spawn_and_wait("a\0b").unwrap_err().is(StraddleCode::InvalidInput));
        assert_eq!(c.spawn_and_wait("tool --flag").unwrap(), SpawnOutcome { pid: 4242, exit_code: 7 });
    }

    #[test]
    fn probe_follows_backend_liveness() {
        let c = ProcessController::new(Scripted::with(&[
            (30, WaitResult::StillRunning),
            (31, WaitResult::Exited(0)),
        ]));
        assert!(c.probe_process(30).unwrap());
        assert!(!c.probe_process(31).unwrap());
        assert!(!c.probe_process(32).unwrap());
        assert_eq!(c.current_uid().unwrap(), 1001);
    }
}
