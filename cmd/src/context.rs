use std::{future::pending, io::Read, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{self, Instant},
};

use super::Error;

/// Carry cancellation, deadline and the input source of a command
///
/// ```ignore
/// let (ctx, cancel) = Context::background()
///     .with_stdin(std::io::Cursor::new("hello"))
///     .with_cancel();
/// ```
#[derive(Default)]
pub struct Context {
    stdin: Option<Box<dyn Read + Send>>,
    cancel: Option<(Arc<watch::Sender<bool>>, watch::Receiver<bool>)>,
    deadline: Option<Instant>,
}

/// cancel the [`Context`] it was created with
///
/// Dropping it without calling [`CancelHandle::cancel`] never cancels.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Context {
    /// an empty context, never cancelled and without input
    pub fn background() -> Self {
        Self::default()
    }
    /// wire `stdin` to the standard input of the command
    pub fn with_stdin(mut self, stdin: impl Read + Send + 'static) -> Self {
        self.stdin = Some(Box::new(stdin));
        self
    }
    /// make the context cancellable
    ///
    /// If it's already cancellable, the returned handle cancels the same context.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, _) = self.cancel.get_or_insert_with(|| {
            let (tx, rx) = watch::channel(false);
            (Arc::new(tx), rx)
        });
        let handle = CancelHandle(tx.clone());
        (self, handle)
    }
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
    /// set the deadline, an earlier deadline already set is kept
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
    /// reason of the context being done, `None` if it isn't
    pub fn err(&self) -> Option<Error> {
        if let Some((_, rx)) = &self.cancel {
            if *rx.borrow() {
                return Some(Error::Cancelled);
            }
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }
    pub(crate) fn take_stdin(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdin.take()
    }
    /// wait until the context is cancelled or its deadline passed
    pub(crate) async fn done(&mut self) -> Error {
        let deadline = self.deadline;
        let cancel = self.cancel.as_mut().map(|(_, rx)| rx);

        let cancelled = async move {
            let Some(rx) = cancel else {
                return pending::<()>().await;
            };
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return pending::<()>().await;
                }
            }
        };
        let expired = async move {
            match deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => Error::Cancelled,
            _ = expired => Error::DeadlineExceeded,
        }
    }
}
