use std::{
    ffi::OsStr,
    future::Future,
    io::{self, Read, Write},
    process::{Child, Command, Stdio},
};

use reaper::{signal_name, wait, ExitRecord, Notification, Reaper};
use rustix::process::{kill_process, Pid, Signal};
use tokio::task::{self, JoinHandle};

use super::{context::Context, Error};

/// Spawn commands and collect their exit status
///
/// With a running [`Reaper`], the exit status comes from the reaper.
/// Otherwise the runner waits for the child itself.
#[derive(Clone, Default)]
pub struct Runner {
    reaper: Option<Reaper>,
}

enum Waiter {
    Reaper(Notification),
    Direct(u32),
}

impl Waiter {
    fn new(reaper: Option<&Reaper>, pid: u32) -> Result<Self, Error> {
        let Some(reaper) = reaper else {
            return Ok(Waiter::Direct(pid));
        };
        let registered = match reaper.notify(pid) {
            Err(reaper::Error::AlreadyRegistered(_)) => {
                // the pid is our fresh child, an earlier registration is stale
                log::warn!("replace stale registration of pid {}", pid);
                reaper.stop_notify(pid);
                reaper.notify(pid)
            }
            x => x,
        };
        match registered {
            Ok(notification) => Ok(Waiter::Reaper(notification)),
            Err(reaper::Error::ReaperStopped) => {
                log::warn!("reaper stopped before pid {} was registered", pid);
                Ok(Waiter::Direct(pid))
            }
            Err(err) => Err(err.into()),
        }
    }
    async fn wait(self) -> Result<ExitRecord, Error> {
        match self {
            Waiter::Reaper(notification) => {
                let pid = notification.pid();
                match notification.await {
                    Ok(record) => Ok(record),
                    Err(reaper::Error::ReaperStopped) => {
                        log::debug!("reaper stopped while waiting for pid {}", pid);
                        wait_direct(pid).await
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Waiter::Direct(pid) => wait_direct(pid).await,
        }
    }
}

async fn wait_direct(pid: u32) -> Result<ExitRecord, Error> {
    Ok(task::spawn_blocking(move || wait::wait_for(pid))
        .await
        .map_err(join_error)??)
}

fn join_error(err: task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

fn read_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    task::spawn_blocking(move || {
        let mut buf = Vec::with_capacity(256);
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn feed_stdin(mut input: Box<dyn Read + Send>, mut pipe: impl Write + Send + 'static) {
    task::spawn_blocking(move || {
        // the pipe is closed on drop, which gives the child its EOF
        if let Err(err) = io::copy(&mut input, &mut pipe) {
            log::debug!("Fail forwarding stdin: {}", err);
        }
    });
}

fn kill(child: &Child) {
    if let Err(err) = kill_process(Pid::from_child(child), Signal::Kill) {
        log::debug!("Fail to kill pid {}: {}", child.id(), err);
    }
}

/// wait for the exit record, or kill the child once `ctx` is done
///
/// An exit record that is ready wins over a done context, so a child
/// already collected is never signalled.
async fn settle<F>(exit: F, ctx: &mut Context, kill: impl FnOnce()) -> Result<ExitRecord, Error>
where
    F: Future<Output = Result<ExitRecord, Error>>,
{
    tokio::pin!(exit);
    tokio::select! {
        biased;
        record = &mut exit => record,
        reason = ctx.done() => {
            kill();
            // collect it anyway, so neither a zombie nor a buffered record is left
            exit.await?;
            Err(reason)
        }
    }
}

fn into_output(record: ExitRecord, stdout: Vec<u8>, stderr: Vec<u8>) -> Result<String, Error> {
    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    if record.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    match (record.code(), record.signal()) {
        (Some(code), _) => Err(Error::NonZeroExit {
            code,
            stdout,
            stderr,
        }),
        (None, Some(signo)) => Err(Error::KilledBySignal {
            signo,
            signal: signal_name(signo).into_owned(),
            core_dumped: record.core_dumped(),
            stdout,
            stderr,
        }),
        (None, None) => Err(Error::IO(io::Error::new(
            io::ErrorKind::Other,
            format!("{}: {}", record, stderr),
        ))),
    }
}

impl Runner {
    /// a runner that always waits for its children itself
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_reaper(reaper: Reaper) -> Self {
        Self {
            reaper: Some(reaper),
        }
    }
    /// run a command to completion and return its stdout
    pub async fn run<I, S>(&self, name: &str, args: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_context(Context::background(), name, args).await
    }
    /// run a command under `ctx`
    ///
    /// When `ctx` is done before the command exits, the child is killed,
    /// collected, and the reason of `ctx` is returned.
    pub async fn run_context<I, S>(
        &self,
        mut ctx: Context,
        name: &str,
        args: I,
    ) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let stdin = ctx.take_stdin();
        let mut cmd = Command::new(name);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(match stdin {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        });

        // decided before spawning, a child must not be reaped by a reaper we won't ask
        let reaper = self.reaper.as_ref().filter(|x| x.is_running());

        let spawning = match reaper {
            Some(reaper) => Some(reaper.spawn_guard().await),
            None => None,
        };
        let spawned = cmd.spawn();
        drop(spawning);

        let mut child = spawned.map_err(|source| Error::SpawnFailed {
            name: name.to_owned(),
            source,
        })?;
        let pid = child.id();
        log::trace!("spawn {} as pid {}", name, pid);

        let waiter = match Waiter::new(reaper, pid) {
            Ok(waiter) => waiter,
            Err(err) => {
                kill(&child);
                return Err(err);
            }
        };

        if let (Some(input), Some(pipe)) = (stdin, child.stdin.take()) {
            feed_stdin(input, pipe);
        }
        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        let record = settle(waiter.wait(), &mut ctx, || {
            log::debug!("kill {} (pid {})", name, pid);
            kill(&child);
        })
        .await?;

        let stdout = stdout.await.map_err(join_error)??;
        let stderr = stderr.await.map_err(join_error)??;

        into_output(record, stdout, stderr)
    }
}
