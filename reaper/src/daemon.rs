use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::{
    signal::unix::{signal, Signal, SignalKind},
    sync::{oneshot, Mutex, RwLock, RwLockReadGuard},
    task::JoinHandle,
};

use super::{
    config::ReaperConfig,
    registry::{Notification, Registry, RegistryStatistic},
    wait, Error,
};

static ACTIVE_LOOPS: AtomicUsize = AtomicUsize::new(0);

/// number of collection loops alive in this process
pub fn active_loops() -> usize {
    ACTIVE_LOOPS.load(Ordering::Acquire)
}

/// close the registry however the loop exits, including its task being
/// dropped with the runtime
struct LoopGuard(Arc<Registry>);

impl LoopGuard {
    fn enter(registry: Arc<Registry>) -> Self {
        ACTIVE_LOOPS.fetch_add(1, Ordering::AcqRel);
        LoopGuard(registry)
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.close();
        ACTIVE_LOOPS.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held while a child is being spawned, see [`Reaper::spawn_guard`]
pub type SpawnGuard<'a> = RwLockReadGuard<'a, ()>;

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct ReaperInner {
    config: ReaperConfig,
    registry: Arc<Registry>,
    spawning: Arc<RwLock<()>>,
    worker: Mutex<Option<Worker>>,
}

/// Reap every terminated child of this process and route its exit record
///
/// The reaper collects all children, not only the registered ones, so run
/// at most one per process. Cloning gives another handle to the same reaper.
#[derive(Clone)]
pub struct Reaper(Arc<ReaperInner>);

impl Default for Reaper {
    fn default() -> Self {
        Self::new(ReaperConfig::default())
    }
}

impl Reaper {
    pub fn new(config: ReaperConfig) -> Self {
        Self(Arc::new(ReaperInner {
            config,
            registry: Arc::new(Registry::default()),
            spawning: Arc::new(RwLock::new(())),
            worker: Mutex::new(None),
        }))
    }
    /// start the collection loop, no-op if it's running
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(&self) -> Result<(), Error> {
        let mut worker = self.0.worker.lock().await;

        if let Some(running) = worker.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
            log::warn!("collection loop died, restarting");
            if let Some(dead) = worker.take() {
                dead.handle.await.ok();
            }
        }

        if self.0.config.subreaper {
            wait::become_subreaper().map_err(Error::Subreaper)?;
        }
        let sigchld = signal(SignalKind::child()).map_err(Error::Signal)?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        self.0.registry.open();
        // entered before spawning, a task dropped unpolled still closes the registry
        let guard = LoopGuard::enter(self.0.registry.clone());
        let handle = tokio::spawn(collect_loop(
            guard,
            self.0.registry.clone(),
            self.0.spawning.clone(),
            sigchld,
            shutdown_rx,
        ));

        log::debug!("Reaper started");
        *worker = Some(Worker { shutdown, handle });
        Ok(())
    }
    /// stop the collection loop and wait for it to exit, no-op if not running
    ///
    /// Outstanding notifications resolve with [`Error::ReaperStopped`],
    /// and nothing is reaped in the background once it returns.
    pub async fn stop(&self) {
        let mut worker = self.0.worker.lock().await;
        let Some(running) = worker.take() else {
            return;
        };

        running.shutdown.send(()).ok();
        match running.handle.await {
            Err(err) if err.is_panic() => log::error!("collection loop panicked: {}", err),
            Err(_) => log::debug!("collection loop was cancelled with its runtime"),
            Ok(()) => {}
        }

        log::debug!("Reaper stopped");
    }
    /// register interest in the exit record of `pid`
    ///
    /// If the child has already been reaped, the returned notification is
    /// fulfilled. A pid that is not a child of this process is never
    /// fulfilled, it only resolves when the reaper stops.
    pub fn notify(&self, pid: u32) -> Result<Notification, Error> {
        self.0.registry.register(pid)
    }
    /// cancel the registration of `pid`, no-op if it's already fulfilled
    pub fn stop_notify(&self, pid: u32) {
        self.0.registry.cancel(pid);
    }
    pub fn is_running(&self) -> bool {
        self.0.registry.is_open()
    }
    pub fn usage(&self) -> RegistryStatistic {
        self.0.registry.usage()
    }
    /// keep the reaper from collecting while the guard is alive
    ///
    /// Hold it across `fork`/`exec` of a child: a child whose `exec` fails is
    /// collected by the spawning code itself, and must not be taken (then
    /// buffered forever) by the reaper in between.
    pub async fn spawn_guard(&self) -> SpawnGuard<'_> {
        self.0.spawning.read().await
    }
}

/// collect every terminated child, return false if reaping is no longer possible
async fn drain(registry: &Registry, spawning: &RwLock<()>) -> bool {
    let _spawning = spawning.write().await;
    loop {
        match wait::try_reap() {
            Ok(Some(record)) => {
                log::trace!("reaped pid {}: {}", record.pid(), record);
                registry.deliver(record);
            }
            Ok(None) => return true,
            Err(err) => {
                log::error!("Fail to reap children: {}", err);
                return false;
            }
        }
    }
}

async fn collect_loop(
    _guard: LoopGuard,
    registry: Arc<Registry>,
    spawning: Arc<RwLock<()>>,
    mut sigchld: Signal,
    mut shutdown: oneshot::Receiver<()>,
) {
    // children may have exited before the subscription was installed
    if !drain(&registry, &spawning).await {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            notified = sigchld.recv() => {
                if notified.is_none() {
                    log::warn!("child signal stream closed");
                    break;
                }
            }
        }
        if !drain(&registry, &spawning).await {
            return;
        }
    }

    // a child may have terminated right at shutdown
    drain(&registry, &spawning).await;
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;
    use std::{process::Command, time::Duration};
    use tokio::time;

    async fn wait_pending(reaper: &Reaper, pending: usize) {
        time::timeout(Duration::from_secs(5), async {
            while reaper.usage().pending < pending {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("child never reaped");
    }

    #[tokio::test]
    #[serial]
    async fn notify_before_exit() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let child = Command::new("sh").args(["-c", "sleep 0.2; exit 4"]).spawn().unwrap();
        let record = reaper.notify(child.id()).unwrap().await.unwrap();

        assert_eq!(record.pid(), child.id());
        assert_eq!(record.code(), Some(4));
        assert_eq!(reaper.usage().waiting, 0);
        reaper.stop().await;
    }
    #[tokio::test]
    #[serial]
    async fn notify_after_reap() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let child = Command::new("true").spawn().unwrap();
        wait_pending(&reaper, 1).await;

        let notification = reaper.notify(child.id()).unwrap();
        assert_eq!(reaper.usage().pending, 0);
        let record = notification.await.unwrap();
        assert!(record.success());

        assert_eq!(reaper.usage().pending, 0);
        assert_eq!(reaper.usage().waiting, 0);
        reaper.stop().await;
    }
    #[tokio::test]
    #[serial]
    async fn double_notify() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let child = Command::new("sleep").arg("0.2").spawn().unwrap();
        let first = reaper.notify(child.id()).unwrap();
        assert!(matches!(
            reaper.notify(child.id()),
            Err(Error::AlreadyRegistered(pid)) if pid == child.id()
        ));

        assert!(first.await.unwrap().success());
        reaper.stop().await;
    }
    #[tokio::test]
    #[serial]
    async fn stop_fails_outstanding() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let mut children = Vec::new();
        let mut notifications = Vec::new();
        for _ in 0..3 {
            let child = Command::new("sleep").arg("5").spawn().unwrap();
            notifications.push(reaper.notify(child.id()).unwrap());
            children.push(child);
        }

        reaper.stop().await;
        assert_eq!(active_loops(), 0);
        for notification in notifications {
            assert!(matches!(notification.await, Err(Error::ReaperStopped)));
        }
        assert!(matches!(reaper.notify(1), Err(Error::ReaperStopped)));

        for mut child in children {
            child.kill().unwrap();
            child.wait().unwrap();
        }
    }
    #[tokio::test]
    #[serial]
    async fn no_reaping_after_stop() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();
        reaper.stop().await;

        let child = Command::new("true").spawn().unwrap();
        time::sleep(Duration::from_millis(200)).await;

        let record = wait::wait_for(child.id()).unwrap();
        assert!(record.success());
    }
    #[tokio::test]
    #[serial]
    async fn start_stop_cycles() {
        let reaper = Reaper::default();
        for _ in 0..5 {
            reaper.start().await.unwrap();
            // idempotent
            reaper.start().await.unwrap();
            assert_eq!(active_loops(), 1);
            reaper.stop().await;
            reaper.stop().await;
        }
        assert_eq!(active_loops(), 0);
        assert_eq!(reaper.usage(), RegistryStatistic::default());
        assert!(!reaper.is_running());
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn concurrent_start() {
        let reaper = Reaper::default();
        let starts: Vec<_> = (0..8)
            .map(|_| {
                let reaper = reaper.clone();
                tokio::spawn(async move { reaper.start().await })
            })
            .collect();
        for start in starts {
            start.await.unwrap().unwrap();
        }
        assert_eq!(active_loops(), 1);
        reaper.stop().await;
        assert_eq!(active_loops(), 0);
    }
    #[test]
    #[serial]
    fn runtime_dropped() {
        let reaper = Reaper::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(reaper.start()).unwrap();
        assert!(reaper.is_running());
        drop(runtime);

        assert_eq!(active_loops(), 0);
        assert!(!reaper.is_running());
        assert!(matches!(reaper.notify(1), Err(Error::ReaperStopped)));

        // a new runtime can start it again
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            reaper.start().await.unwrap();
            assert!(reaper.is_running());
            reaper.stop().await;
        });
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn no_reaping_under_spawn_guard() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let guard = reaper.spawn_guard().await;
        let child = Command::new("true").spawn().unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reaper.usage().pending, 0);
        drop(guard);

        wait_pending(&reaper, 1).await;
        assert!(reaper.notify(child.id()).unwrap().await.unwrap().success());
        reaper.stop().await;
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn many_children() {
        let reaper = Reaper::default();
        reaper.start().await.unwrap();

        let waits: Vec<_> = (0..16)
            .map(|i| {
                let child = Command::new("sh")
                    .args(["-c", &format!("exit {}", i)])
                    .spawn()
                    .unwrap();
                let reaper = reaper.clone();
                tokio::spawn(async move {
                    let record = reaper.notify(child.id()).unwrap().await.unwrap();
                    (i, record)
                })
            })
            .collect();

        for wait in waits {
            let (i, record) = wait.await.unwrap();
            assert_eq!(record.code(), Some(i));
        }
        assert_eq!(reaper.usage().waiting, 0);
        assert_eq!(reaper.usage().pending, 0);
        reaper.stop().await;
    }
}
