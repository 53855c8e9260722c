//! Run external commands, capture their output and report failures
//! with the command's own stderr attached.
pub mod context;
pub mod runner;

use std::{ffi::OsStr, io};

use thiserror::Error;

pub use context::{CancelHandle, Context};
pub use runner::Runner;

#[derive(Error, Debug)]
pub enum Error {
    /// the command could not be started
    ///
    /// The message keeps the `<reason>: <stderr>` shape of the other
    /// failures, with an empty stderr since nothing ran.
    #[error("exec: {name:?}: {source}: ")]
    SpawnFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("exit status {code}: {stderr}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("signal: {}: {stderr}", describe_signal(.signal, .core_dumped))]
    KilledBySignal {
        signo: i32,
        signal: String,
        core_dumped: bool,
        stdout: String,
        stderr: String,
    },
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("{0}")]
    Reaper(#[from] reaper::Error),
    #[error("`{0}`")]
    IO(#[from] io::Error),
}

fn describe_signal(signal: &str, core_dumped: &bool) -> String {
    match core_dumped {
        true => format!("{} (core dumped)", signal),
        false => signal.to_owned(),
    }
}

impl Error {
    /// exit code of the command, if it ran and exited on its own
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
    /// terminating signal of the command, if it was killed
    pub fn signal(&self) -> Option<i32> {
        match self {
            Error::KilledBySignal { signo, .. } => Some(*signo),
            _ => None,
        }
    }
    /// whatever the command wrote to stdout before failing
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Error::NonZeroExit { stdout, .. } | Error::KilledBySignal { stdout, .. } => {
                Some(stdout)
            }
            _ => None,
        }
    }
    /// stderr captured from the command, if it ran to the end
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::NonZeroExit { stderr, .. } | Error::KilledBySignal { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }
}

/// run a command without cancellation, see [`Runner::run`]
///
/// The child is waited for directly, so don't use it while a
/// [`reaper::Reaper`] is running, use [`Runner::with_reaper`] instead.
pub async fn run<I, S>(name: &str, args: I) -> Result<String, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Runner::new().run(name, args).await
}

/// run a command under `ctx`, see [`Runner::run_context`]
pub async fn run_context<I, S>(ctx: Context, name: &str, args: I) -> Result<String, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Runner::new().run_context(ctx, name, args).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signal_message() {
        let err = Error::KilledBySignal {
            signo: 11,
            signal: "segmentation fault".to_owned(),
            core_dumped: true,
            stdout: String::new(),
            stderr: "boom".to_owned(),
        };
        assert_eq!(err.to_string(), "signal: segmentation fault (core dumped): boom");
        assert_eq!(err.stderr(), Some("boom"));
        assert_eq!(err.exit_code(), None);
        assert_eq!(err.signal(), Some(11));
    }
    #[test]
    fn spawn_message() {
        let err = Error::SpawnFailed {
            name: "nope".to_owned(),
            source: io::Error::from_raw_os_error(2),
        };
        let message = err.to_string();
        assert!(message.starts_with("exec: \"nope\": "));
        assert!(message.ends_with(": "));
        assert_eq!(message, format!("exec: \"nope\": {}: ", io::Error::from_raw_os_error(2)));
    }
    #[tokio::test]
    #[serial_test::serial]
    async fn free_functions() {
        assert_eq!(run("echo", ["hi"]).await.unwrap(), "hi\n");
        let ctx = Context::background().with_stdin(std::io::Cursor::new("x y"));
        assert_eq!(run_context(ctx, "cat", [""; 0]).await.unwrap(), "x y");
    }
}
