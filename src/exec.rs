// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::{CString, OsStr},
    fs,
    io::{self, ErrorKind},
    os::fd::{AsRawFd, BorrowedFd},
    os::unix::ffi::OsStrExt,
    path::Path,
};

use nix::{
    sys::wait::{WaitStatus, waitpid},
    unistd::{ForkResult, Gid, Uid, execv, fork, setgid, setuid},
};
use rustix::fs::{FlockOperation, flock};

use crate::error::{Error, Result};

pub const EXIT_SETGID: i32 = 64;

pub const EXIT_SETUID: i32 = 65;

pub const EXIT_CAPSET: i32 = 66;

pub const EXIT_FLOCK: i32 = 67;

pub const EXIT_EXEC: i32 = 68;

pub const EXIT_SCHED_POLICY: i32 = 70;

pub const EXIT_PRIORITY: i32 = 71;

#[allow(dead_code)]
pub const EXIT_BAD_BACKEND: i32 = 72;

#[allow(dead_code)]
pub const EXIT_BAD_BACKEND_CHILD: i32 = 73;

const BACKGROUND_PRIORITY: i32 = 10;

const BACKGROUND_CGROUP_TASKS: &str = "/dev/cpuctl/bg_non_interactive/tasks";

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Empties every capability set of the calling thread.
fn drop_capabilities() -> io::Result<()> {
    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [CapUserData::default(); 2];
    let rc = unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Joins the background cpu cgroup; on hosts without the hierarchy the batch
/// scheduling class is the closest equivalent.
fn enter_background_class() -> io::Result<()> {
    match fs::write(BACKGROUND_CGROUP_TASKS, b"0") {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let param = libc::sched_param { sched_priority: 0 };
            let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_BATCH, &param) };
            if rc != 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
        Err(e) => Err(e),
    }
}

fn cstring(s: &OsStr) -> CString {
    CString::new(s.as_bytes()).expect("argv element contains NUL")
}

/// Runs `bin` with `argv` in a forked child that first sheds its identity.
/// The child, in order: setgid, setuid, empty capset, background scheduling
/// when requested, a non-blocking exclusive flock on `lock_fd`, execv. Every
/// failure maps to a fixed exit code which the parent reports back as
/// `ChildFailure`.
pub fn run_dropped(
    bin: &Path,
    argv: &[CString],
    uid: u32,
    background: bool,
    lock_fd: Option<BorrowedFd<'_>>,
) -> Result<()> {
    let bin_c = cstring(bin.as_os_str());

    match unsafe { fork() } {
        Ok(ForkResult::Child) => child_main(&bin_c, argv, uid, background, lock_fd),
        Ok(ForkResult::Parent { child }) => {
            let status = loop {
                match waitpid(child, None) {
                    Ok(status) => break status,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => {
                        return Err(Error::io(
                            "waitpid",
                            bin,
                            io::Error::from_raw_os_error(e as i32),
                        ));
                    }
                }
            };
            match status {
                WaitStatus::Exited(_, 0) => Ok(()),
                WaitStatus::Exited(_, code) => Err(Error::ChildFailure {
                    bin: bin.display().to_string(),
                    code,
                }),
                WaitStatus::Signaled(_, signal, _) => Err(Error::ChildFailure {
                    bin: bin.display().to_string(),
                    code: 128 + signal as i32,
                }),
                other => Err(Error::io(
                    "waitpid",
                    bin,
                    io::Error::other(format!("unexpected wait status {:?}", other)),
                )),
            }
        }
        Err(e) => Err(Error::io("fork", bin, io::Error::from_raw_os_error(e as i32))),
    }
}

fn child_main(
    bin: &CString,
    argv: &[CString],
    uid: u32,
    background: bool,
    lock_fd: Option<BorrowedFd<'_>>,
) -> ! {
    if setgid(Gid::from_raw(uid)).is_err() {
        eprintln!("setgid({}) failed before exec", uid);
        unsafe { libc::_exit(EXIT_SETGID) };
    }
    if setuid(Uid::from_raw(uid)).is_err() {
        eprintln!("setuid({}) failed before exec", uid);
        unsafe { libc::_exit(EXIT_SETUID) };
    }
    if let Err(e) = drop_capabilities() {
        eprintln!("capset failed: {}", e);
        unsafe { libc::_exit(EXIT_CAPSET) };
    }
    if background {
        if let Err(e) = enter_background_class() {
            eprintln!("background scheduling failed: {}", e);
            unsafe { libc::_exit(EXIT_SCHED_POLICY) };
        }
        if rustix::process::setpriority_process(None, BACKGROUND_PRIORITY).is_err() {
            eprintln!("setpriority failed");
            unsafe { libc::_exit(EXIT_PRIORITY) };
        }
    }
    if let Some(fd) = lock_fd {
        if flock(fd, FlockOperation::NonBlockingLockExclusive).is_err() {
            eprintln!("flock(fd {}) contested", fd.as_raw_fd());
            unsafe { libc::_exit(EXIT_FLOCK) };
        }
    }

    let _ = execv(bin, argv);
    eprintln!("execv({:?}) failed", bin);
    unsafe { libc::_exit(EXIT_EXEC) }
}
