use std::{
    borrow::Cow,
    fmt::Display,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    time::Duration,
};

/// Resource usage of a reaped child, as reported by `wait4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    /// maximum resident set size, in the unit the host reports (KiB on linux)
    pub max_rss: u64,
}

impl ResourceUsage {
    pub(crate) fn from_raw(raw: &libc::rusage) -> Self {
        Self {
            user_time: timeval_to_duration(&raw.ru_utime),
            system_time: timeval_to_duration(&raw.ru_stime),
            max_rss: raw.ru_maxrss.max(0) as u64,
        }
    }
}

fn timeval_to_duration(tv: &libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

/// Exit status of a terminated child, collected exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pid: u32,
    status: ExitStatus,
    usage: Option<ResourceUsage>,
}

impl ExitRecord {
    pub fn new(pid: u32, status: ExitStatus, usage: Option<ResourceUsage>) -> Self {
        Self { pid, status, usage }
    }
    /// build a record from the raw status word filled by `wait(2)` family
    pub fn from_raw(pid: u32, raw: i32, usage: Option<ResourceUsage>) -> Self {
        Self::new(pid, ExitStatus::from_raw(raw), usage)
    }
    pub fn pid(&self) -> u32 {
        self.pid
    }
    pub fn status(&self) -> ExitStatus {
        self.status
    }
    /// exit code, `None` if the child was killed by a signal
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
    /// terminating signal, `None` if the child exited normally
    pub fn signal(&self) -> Option<i32> {
        self.status.signal()
    }
    pub fn core_dumped(&self) -> bool {
        self.status.core_dumped()
    }
    pub fn success(&self) -> bool {
        self.status.success()
    }
    /// get the resource usage of the child
    ///
    /// it's `None` when the record wasn't produced by `wait4`
    pub fn usage(&self) -> Option<&ResourceUsage> {
        self.usage.as_ref()
    }
}

impl Display for ExitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(f, "exit status {}", code),
            (None, Some(signo)) => {
                write!(f, "signal: {}", signal_name(signo))?;
                if self.core_dumped() {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
            (None, None) => write!(f, "exit status unknown"),
        }
    }
}

/// Name of a signal in the host's own vocabulary, as `strsignal` would print it
pub fn signal_name(signo: i32) -> Cow<'static, str> {
    let name = match signo {
        libc::SIGHUP => "hangup",
        libc::SIGINT => "interrupt",
        libc::SIGQUIT => "quit",
        libc::SIGILL => "illegal instruction",
        libc::SIGTRAP => "trace/breakpoint trap",
        libc::SIGABRT => "aborted",
        libc::SIGBUS => "bus error",
        libc::SIGFPE => "floating point exception",
        libc::SIGKILL => "killed",
        libc::SIGUSR1 => "user defined signal 1",
        libc::SIGSEGV => "segmentation fault",
        libc::SIGUSR2 => "user defined signal 2",
        libc::SIGPIPE => "broken pipe",
        libc::SIGALRM => "alarm clock",
        libc::SIGTERM => "terminated",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::SIGSTKFLT => "stack fault",
        libc::SIGCHLD => "child exited",
        libc::SIGCONT => "continued",
        libc::SIGSTOP => "stopped (signal)",
        libc::SIGTSTP => "stopped",
        libc::SIGTTIN => "stopped (tty input)",
        libc::SIGTTOU => "stopped (tty output)",
        libc::SIGURG => "urgent I/O condition",
        libc::SIGXCPU => "CPU time limit exceeded",
        libc::SIGXFSZ => "file size limit exceeded",
        libc::SIGVTALRM => "virtual timer expired",
        libc::SIGPROF => "profiling timer expired",
        libc::SIGWINCH => "window changed",
        libc::SIGIO => "I/O possible",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::SIGPWR => "power failure",
        libc::SIGSYS => "bad system call",
        _ => return Cow::Owned(format!("signal {}", signo)),
    };
    Cow::Borrowed(name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_exit_code() {
        let record = ExitRecord::from_raw(42, 1 << 8, None);
        assert_eq!(record.code(), Some(1));
        assert!(!record.success());
        assert_eq!(record.to_string(), "exit status 1");
    }
    #[test]
    fn display_signal() {
        let record = ExitRecord::from_raw(42, libc::SIGINT, None);
        assert_eq!(record.code(), None);
        assert_eq!(record.signal(), Some(libc::SIGINT));
        assert_eq!(record.to_string(), "signal: interrupt");
    }
    #[test]
    fn display_core_dump() {
        // 0x80 is the core dump bit of the status word
        let record = ExitRecord::from_raw(42, libc::SIGSEGV | 0x80, None);
        assert!(record.core_dumped());
        assert_eq!(record.to_string(), "signal: segmentation fault (core dumped)");
    }
    #[test]
    fn unknown_signal_name() {
        assert_eq!(signal_name(99), "signal 99");
        assert_eq!(signal_name(libc::SIGKILL), "killed");
    }
    #[test]
    fn usage_from_rusage() {
        let mut raw: libc::rusage = unsafe { std::mem::zeroed() };
        raw.ru_utime.tv_sec = 1;
        raw.ru_utime.tv_usec = 500;
        raw.ru_maxrss = 2048;
        let usage = ResourceUsage::from_raw(&raw);
        assert_eq!(usage.user_time, Duration::from_micros(1_000_500));
        assert_eq!(usage.system_time, Duration::ZERO);
        assert_eq!(usage.max_rss, 2048);
    }
}
