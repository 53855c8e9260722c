//! Thin wrappers over the host's `wait4` and `prctl`
use std::{io, mem::MaybeUninit};

use super::exit::{ExitRecord, ResourceUsage};

fn wait4(pid: libc::pid_t, options: libc::c_int) -> io::Result<Option<ExitRecord>> {
    let mut status: libc::c_int = 0;
    let mut usage = MaybeUninit::<libc::rusage>::zeroed();
    loop {
        // SAFETY: both out pointers are valid for the whole call
        let ret = unsafe { libc::wait4(pid, &mut status, options, usage.as_mut_ptr()) };
        match ret {
            0 => return Ok(None),
            -1 => {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    _ => return Err(err),
                }
            }
            pid => {
                // SAFETY: the kernel filled it when a child was collected
                let usage = unsafe { usage.assume_init_ref() };
                return Ok(Some(ExitRecord::from_raw(
                    pid as u32,
                    status,
                    Some(ResourceUsage::from_raw(usage)),
                )));
            }
        }
    }
}

/// collect the next terminated child without blocking
///
/// `Ok(None)` covers both "children are alive but none exited"
/// and "no children at all", neither is an error for a reaper.
pub fn try_reap() -> io::Result<Option<ExitRecord>> {
    match wait4(-1, libc::WNOHANG) {
        Err(err) if err.raw_os_error() == Some(libc::ECHILD) => Ok(None),
        x => x,
    }
}

/// block until the given child terminates and collect it
///
/// Only use it when nothing else is reaping, otherwise the call races
/// with the reaper and may end up with `ECHILD`.
pub fn wait_for(pid: u32) -> io::Result<ExitRecord> {
    wait4(pid as libc::pid_t, 0)?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("wait4 returned without collecting {}", pid),
        )
    })
}

/// Ask the kernel to re-parent orphaned descendants to this process
#[cfg(target_os = "linux")]
pub fn become_subreaper() -> io::Result<()> {
    // SAFETY: PR_SET_CHILD_SUBREAPER only reads the integer argument
    let code = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if code != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn become_subreaper() -> io::Result<()> {
    log::warn!("subreaper is only supported on linux, ignored");
    Ok(())
}
