use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use spin::mutex::Mutex;
use tokio::sync::oneshot;

use super::{exit::ExitRecord, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStatistic {
    /// registrations waiting for their child
    pub waiting: usize,
    /// records reaped before anyone asked
    pub pending: usize,
    pub running: bool,
}

/// Correlate reaped children with the ones waiting for them
///
/// Both maps live behind one lock, so a pid is never in both:
/// whoever comes second (registration or reap) resolves it.
#[derive(Default)]
pub struct Registry(Mutex<RegistryInner>);

#[derive(Default)]
struct RegistryInner {
    open: bool,
    waiters: HashMap<u32, oneshot::Sender<ExitRecord>>,
    pending: HashMap<u32, ExitRecord>,
}

impl Registry {
    pub fn open(&self) {
        self.0.lock().open = true;
    }
    /// stop accepting registrations and fail the outstanding ones
    ///
    /// buffered records are discarded
    pub fn close(&self) {
        let waiters = {
            let mut self_ = self.0.lock();
            self_.open = false;
            self_.pending.clear();
            std::mem::take(&mut self_.waiters)
        };
        if !waiters.is_empty() {
            log::debug!("fail {} outstanding registrations", waiters.len());
        }
        // dropping the sender resolves the notification with `ReaperStopped`
        drop(waiters);
    }
    pub fn is_open(&self) -> bool {
        self.0.lock().open
    }
    pub fn register(&self, pid: u32) -> Result<Notification, Error> {
        let (tx, rx) = oneshot::channel();

        let buffered = {
            let mut self_ = self.0.lock();
            if !self_.open {
                return Err(Error::ReaperStopped);
            }
            if self_.waiters.contains_key(&pid) {
                return Err(Error::AlreadyRegistered(pid));
            }
            match self_.pending.remove(&pid) {
                Some(record) => record,
                None => {
                    self_.waiters.insert(pid, tx);
                    return Ok(Notification { pid, rx });
                }
            }
        };

        log::trace!("pid {} was reaped before registration", pid);
        let _ = tx.send(buffered);
        Ok(Notification { pid, rx })
    }
    pub fn cancel(&self, pid: u32) {
        if self.0.lock().waiters.remove(&pid).is_some() {
            log::trace!("registration of pid {} cancelled", pid);
        }
    }
    /// hand a freshly reaped record to its waiter, or buffer it
    pub fn deliver(&self, record: ExitRecord) {
        let pid = record.pid();
        let waiter = {
            let mut self_ = self.0.lock();
            if !self_.open {
                log::debug!("drop record of pid {}, registry is closed", pid);
                return;
            }
            match self_.waiters.remove(&pid) {
                Some(tx) => tx,
                None => {
                    self_.pending.insert(pid, record);
                    return;
                }
            }
        };
        if waiter.send(record).is_err() {
            log::debug!("waiter of pid {} has gone", pid);
        }
    }
    pub fn usage(&self) -> RegistryStatistic {
        let self_ = self.0.lock();
        RegistryStatistic {
            waiting: self_.waiters.len(),
            pending: self_.pending.len(),
            running: self_.open,
        }
    }
}

/// One-shot handle resolving to the exit record of a child
///
/// Resolve to [`Error::ReaperStopped`] if the reaper stops first
/// or the registration is cancelled.
#[derive(Debug)]
pub struct Notification {
    pid: u32,
    rx: oneshot::Receiver<ExitRecord>,
}

impl Notification {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Future for Notification {
    type Output = Result<ExitRecord, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|x| x.map_err(|_| Error::ReaperStopped))
    }
}
