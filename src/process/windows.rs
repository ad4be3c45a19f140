use std::{ffi::OsStr, mem, ptr};

use log::warn;
use windows_sys::Win32::{
    Foundation::{
        ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, GetLastError, HANDLE, WAIT_FAILED,
        WAIT_OBJECT_0, WAIT_TIMEOUT,
    },
    System::{
        Console::GenerateConsoleCtrlEvent,
        Threading::{
            CREATE_SUSPENDED, CreateProcessW, GetExitCodeProcess, INFINITE, OpenProcess,
            PROCESS_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE,
            ResumeThread, STARTUPINFOW, TerminateProcess, WaitForSingleObject,
        },
    },
};

use crate::{
    ProcessBackend, Result, StraddleCode, StraddleError,
    guard::{Owned, win},
    perm::windows::TokenUserSid,
    process::{ControlEvent, SignalTarget},
    types::{Pid, SpawnOutcome, Uid, WaitResult},
};

fn open(pid: Pid) -> Result<Owned<HANDLE>> {
    let h = unsafe { OpenProcess(PROCESS_SYNCHRONIZE | PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32) };
    if h.is_null() {
        return Err(StraddleError::last_os_error(
            StraddleCode::ResourceUnavailable,
            format_args!("OpenProcess({pid})"),
        ));
    }
    Ok(win::handle(h))
}

fn exit_code(h: HANDLE, pid: Pid) -> Result<i32> {
    let mut code = 0u32;
    if unsafe { GetExitCodeProcess(h, &mut code) } == 0 {
        return Err(StraddleError::last_os_error(StraddleCode::Io, format_args!("GetExitCodeProcess({pid})")));
    }
    Ok(code as i32)
}

/// Process handles opened per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProcesses;

impl ProcessBackend for NativeProcesses {
    fn wait(&self, pid: Pid, block: bool) -> Result<WaitResult> {
        let h = open(pid)?;
        let timeout = if block { INFINITE } else { 0 };
        match unsafe { WaitForSingleObject(h.get(), timeout) } {
            WAIT_OBJECT_0 => Ok(WaitResult::Exited(exit_code(h.get(), pid)?)),
            WAIT_TIMEOUT if !block => Ok(WaitResult::StillRunning),
            WAIT_FAILED => Err(StraddleError::last_os_error(
                StraddleCode::Io,
                format_args!("WaitForSingleObject({pid})"),
            )),
            other => Err(StraddleError::new(StraddleCode::Io)
                .ctx(format_args!("WaitForSingleObject({pid}) returned {other:#x}"))),
        }
    }

    fn is_alive(&self, pid: Pid) -> Result<bool> {
        let h = unsafe { OpenProcess(PROCESS_SYNCHRONIZE | PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32) };
        if h.is_null() {
            return match unsafe { GetLastError() } {
                ERROR_INVALID_PARAMETER => Ok(false),
                // exists, but the token may not look at it
                ERROR_ACCESS_DENIED => Ok(true),
                _ => Err(StraddleError::last_os_error(
                    StraddleCode::ResourceUnavailable,
                    format_args!("OpenProcess({pid})"),
                )),
            };
        }
        let h = win::handle(h);
        Ok(unsafe { WaitForSingleObject(h.get(), 0) } == WAIT_TIMEOUT)
    }

    fn raise(&self, target: SignalTarget, event: ControlEvent) -> Result<()> {
        let group = match target {
            SignalTarget::Group => 0,
            SignalTarget::Process(pid) => pid as u32,
        };
        if unsafe { GenerateConsoleCtrlEvent(event.native(), group) } == 0 {
            return Err(StraddleError::last_os_error(
                StraddleCode::Io,
                format_args!("GenerateConsoleCtrlEvent({event:?}, {group})"),
            ));
        }
        Ok(())
    }

    fn spawn_and_wait(&self, command: &str) -> Result<SpawnOutcome> {
        // CreateProcessW may write into the command line buffer
        let mut line = win::wide(OsStr::new(command))?;

        let mut si: STARTUPINFOW = unsafe { mem::zeroed() };
        si.cb = mem::size_of::<STARTUPINFOW>() as u32;
        let mut pi: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        let ok = unsafe {
            CreateProcessW(
                ptr::null(),
                line.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                CREATE_SUSPENDED,
                ptr::null(),
                ptr::null(),
                &si,
                &mut pi,
            )
        };
        if ok == 0 {
            return Err(StraddleError::last_os_error(
                StraddleCode::ResourceUnavailable,
                format_args!("CreateProcessW({command:?})"),
            ));
        }
        let process = win::handle(pi.hProcess);
        let thread = win::handle(pi.hThread);
        let pid = pi.dwProcessId as Pid;

        if unsafe { ResumeThread(thread.get()) } == u32::MAX {
            let cause = StraddleError::last_os_error(StraddleCode::Io, "ResumeThread");
            if unsafe { TerminateProcess(process.get(), 1) } == 0 {
                warn!("suspended child {pid} could not be terminated");
            }
            return Err(StraddleError::partial_failure(
                format_args!("child {pid} created suspended but never resumed"),
                cause,
            ));
        }
        drop(thread);

        if unsafe { WaitForSingleObject(process.get(), INFINITE) } != WAIT_OBJECT_0 {
            return Err(StraddleError::last_os_error(
                StraddleCode::Io,
                format_args!("WaitForSingleObject({pid})"),
            ));
        }
        let exit_code = exit_code(process.get(), pid)?;
        Ok(SpawnOutcome { pid, exit_code })
    }

    fn current_uid(&self) -> Result<Uid> {
        Ok(TokenUserSid::current()?.rid() as Uid)
    }
}
