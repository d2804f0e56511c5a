use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use roost_core::{BotState, LogChunk, LogSource, ResourceUsage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::broadcast::LogBroadcaster;
use crate::error::HostError;
use crate::launcher::{LaunchSpec, ProcessLauncher, Signal};
use crate::paths::env_u64;

pub fn stop_timeout() -> Duration {
    Duration::from_millis(
        env_u64("ROOST_STOP_TIMEOUT_MS")
            .map(|v| v.clamp(1000, 5 * 60 * 1000))
            .unwrap_or(10_000),
    )
}

fn resource_sample_interval() -> Duration {
    Duration::from_millis(
        env_u64("ROOST_RESOURCE_SAMPLE_INTERVAL_MS")
            .map(|v| v.clamp(250, 60_000))
            .unwrap_or(2000),
    )
}

#[cfg(target_os = "linux")]
fn ticks_per_sec() -> u64 {
    static TICKS: OnceLock<u64> = OnceLock::new();
    *TICKS.get_or_init(|| unsafe {
        let v = libc::sysconf(libc::_SC_CLK_TCK);
        if v <= 0 { 100 } else { v as u64 }
    })
}

#[cfg(not(target_os = "linux"))]
fn ticks_per_sec() -> u64 {
    100
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    static PAGE: OnceLock<u64> = OnceLock::new();
    *PAGE.get_or_init(|| unsafe {
        let v = libc::sysconf(libc::_SC_PAGESIZE);
        if v <= 0 { 4096 } else { v as u64 }
    })
}

#[cfg(not(target_os = "linux"))]
fn page_size() -> u64 {
    4096
}

#[cfg(target_os = "linux")]
async fn read_proc_cpu_ticks(pid: u32) -> Option<u64> {
    let stat_path = format!("/proc/{pid}/stat");
    let s = tokio::fs::read_to_string(stat_path).await.ok()?;
    let end = s.rfind(')')?;
    let rest = s.get((end + 2)..)?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = parts.get(11)?.parse().ok()?;
    let stime: u64 = parts.get(12)?.parse().ok()?;
    Some(utime.saturating_add(stime))
}

#[cfg(not(target_os = "linux"))]
async fn read_proc_cpu_ticks(_pid: u32) -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
async fn read_proc_rss_bytes(pid: u32) -> Option<u64> {
    let statm_path = format!("/proc/{pid}/statm");
    let s = tokio::fs::read_to_string(statm_path).await.ok()?;
    let mut it = s.split_whitespace();
    let _size_pages = it.next()?;
    let resident_pages: u64 = it.next()?.parse().ok()?;
    Some(resident_pages.saturating_mul(page_size()))
}

#[cfg(not(target_os = "linux"))]
async fn read_proc_rss_bytes(_pid: u32) -> Option<u64> {
    None
}

fn cpu_percent_x100(
    prev_ticks: u64,
    prev_at: tokio::time::Instant,
    ticks: u64,
    now: tokio::time::Instant,
) -> u32 {
    let dt = now.duration_since(prev_at).as_secs_f64();
    if dt <= 0.0 {
        return 0;
    }
    let delta_ticks = ticks.saturating_sub(prev_ticks) as f64;
    let cpu = (delta_ticks / ticks_per_sec() as f64) / dt * 100.0;
    // 1/100 of a percent.
    let x100 = (cpu * 100.0).round();
    if x100.is_finite() {
        x100.clamp(0.0, u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Emitted once per supervised process when it terminates, after the handle
/// has been removed from the registry.
#[derive(Debug, Clone)]
pub struct BotExit {
    pub bot_id: Uuid,
    pub exit_code: Option<i32>,
    /// An explicit stop was in flight when the process went down.
    pub stopping: bool,
    /// Set when waiting on the child itself failed.
    pub error: Option<String>,
}

struct BotEntry {
    state: BotState,
    pid: Option<u32>,
    resources: Option<ResourceUsage>,
    signal: Option<Arc<dyn Fn(Signal) + Send + Sync>>,
}

/// Owns the live process handles. A bot has an entry here if and only if its
/// process is running or a start/stop is in flight; everything else lives in
/// the database.
#[derive(Clone)]
pub struct BotSupervisor {
    inner: Arc<Mutex<HashMap<Uuid, BotEntry>>>,
    launcher: Arc<dyn ProcessLauncher>,
    broadcaster: LogBroadcaster,
    exits: mpsc::UnboundedSender<BotExit>,
}

impl BotSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        broadcaster: LogBroadcaster,
        exits: mpsc::UnboundedSender<BotExit>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            launcher,
            broadcaster,
            exits,
        }
    }

    pub async fn is_active(&self, bot_id: Uuid) -> bool {
        self.inner.lock().await.contains_key(&bot_id)
    }

    pub async fn status(&self, bot_id: Uuid) -> Option<(BotState, Option<u32>)> {
        self.inner
            .lock()
            .await
            .get(&bot_id)
            .map(|e| (e.state, e.pid))
    }

    pub async fn resources(&self, bot_id: Uuid) -> Option<ResourceUsage> {
        self.inner.lock().await.get(&bot_id).and_then(|e| e.resources)
    }

    /// Spawn the bot process and register its handle. Rejects when a handle
    /// already exists for the id.
    pub async fn start(&self, bot_id: Uuid, spec: LaunchSpec) -> Result<Option<u32>, HostError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.contains_key(&bot_id) {
                return Err(HostError::AlreadyRunning);
            }
            inner.insert(
                bot_id,
                BotEntry {
                    state: BotState::Starting,
                    pid: None,
                    resources: None,
                    signal: None,
                },
            );
        }

        let launched = match self.launcher.launch(&spec) {
            Ok(v) => v,
            Err(e) => {
                self.inner.lock().await.remove(&bot_id);
                return Err(HostError::Spawn(e.to_string()));
            }
        };

        let pid = launched.pid;
        let signal: Arc<dyn Fn(Signal) + Send + Sync> = Arc::from(launched.signal);

        if let Some(out) = launched.stdout {
            let broadcaster = self.broadcaster.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    broadcaster
                        .publish(
                            bot_id,
                            LogChunk {
                                source: LogSource::Stdout,
                                line,
                            },
                        )
                        .await;
                }
            });
        }
        if let Some(err) = launched.stderr {
            let broadcaster = self.broadcaster.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    broadcaster
                        .publish(
                            bot_id,
                            LogChunk {
                                source: LogSource::Stderr,
                                line,
                            },
                        )
                        .await;
                }
            });
        }

        let stop_requested = {
            let mut inner = self.inner.lock().await;
            match inner.get_mut(&bot_id) {
                // Deleted concurrently; the exit watcher below still reaps.
                None => false,
                Some(e) => {
                    e.pid = pid;
                    e.signal = Some(signal.clone());
                    if matches!(e.state, BotState::Stopping) {
                        // A stop raced the spawn; honour it now that the
                        // handle exists.
                        true
                    } else {
                        e.state = BotState::Running;
                        false
                    }
                }
            }
        };
        if stop_requested {
            (signal)(Signal::Terminate);
        }

        if let Some(pid) = pid {
            self.spawn_resource_sampler(bot_id, pid);
        }

        let inner = self.inner.clone();
        let exits = self.exits.clone();
        let exit = launched.exit;
        tokio::spawn(async move {
            let res = exit.await;
            let stopping = {
                let mut map = inner.lock().await;
                let stopping = map
                    .get(&bot_id)
                    .is_some_and(|e| matches!(e.state, BotState::Stopping));
                map.remove(&bot_id);
                stopping
            };
            let (exit_code, error) = match res {
                Ok(code) => (code, None),
                Err(e) => (None, Some(format!("wait failed: {e}"))),
            };
            let _ = exits.send(BotExit {
                bot_id,
                exit_code,
                stopping,
                error,
            });
        });

        Ok(pid)
    }

    /// Signal the process tree and wait for the handle to go away. Idempotent:
    /// stopping a bot with no live handle returns `false` and does nothing.
    pub async fn stop(&self, bot_id: Uuid, timeout: Duration) -> Result<bool, HostError> {
        let signal = {
            let mut inner = self.inner.lock().await;
            let Some(e) = inner.get_mut(&bot_id) else {
                return Ok(false);
            };
            e.state = BotState::Stopping;
            e.signal.clone()
        };

        // If the spawn is still in flight, the start path delivers the
        // termination once the handle exists.
        if let Some(signal) = &signal {
            (signal)(Signal::Terminate);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_active(bot_id).await {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                let sig = self
                    .inner
                    .lock()
                    .await
                    .get(&bot_id)
                    .and_then(|e| e.signal.clone());
                if let Some(sig) = sig {
                    tracing::warn!(bot_id = %bot_id, "stop timed out, escalating to SIGKILL");
                    (sig)(Signal::Kill);
                }
                // The exit watcher reaps the entry once the kill lands.
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn spawn_resource_sampler(&self, bot_id: Uuid, pid: u32) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut last: Option<(u64, tokio::time::Instant)> = None;
            let interval = resource_sample_interval();

            loop {
                let now = tokio::time::Instant::now();
                let Some(ticks) = read_proc_cpu_ticks(pid).await else {
                    break;
                };
                let rss_bytes = read_proc_rss_bytes(pid).await.unwrap_or(0);

                let cpu = last
                    .map(|(prev_ticks, prev_at)| cpu_percent_x100(prev_ticks, prev_at, ticks, now))
                    .unwrap_or(0);
                last = Some((ticks, now));

                {
                    let mut map = inner.lock().await;
                    let Some(e) = map.get_mut(&bot_id) else {
                        break;
                    };
                    if e.pid != Some(pid) {
                        break;
                    }
                    e.resources = Some(ResourceUsage {
                        cpu_percent_x100: cpu,
                        rss_bytes,
                    });
                }

                tokio::time::sleep(interval).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{LaunchedProcess, Signal};
    use std::io;
    use std::path::PathBuf;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeState {
        exits: Vec<oneshot::Sender<Option<i32>>>,
        signals: Vec<Signal>,
        launches: usize,
        fail_next: bool,
    }

    #[derive(Clone, Default)]
    struct FakeLauncher(Arc<std::sync::Mutex<FakeState>>);

    impl FakeLauncher {
        fn resolve_next_exit(&self, code: Option<i32>) {
            let tx = self.0.lock().unwrap().exits.remove(0);
            let _ = tx.send(code);
        }

        fn signals(&self) -> Vec<Signal> {
            self.0.lock().unwrap().signals.clone()
        }

        fn launches(&self) -> usize {
            self.0.lock().unwrap().launches
        }

        fn fail_next(&self) {
            self.0.lock().unwrap().fail_next = true;
        }
    }

    impl ProcessLauncher for FakeLauncher {
        fn launch(&self, _spec: &LaunchSpec) -> io::Result<LaunchedProcess> {
            let (tx, rx) = oneshot::channel();
            let pid;
            {
                let mut st = self.0.lock().unwrap();
                if st.fail_next {
                    st.fail_next = false;
                    return Err(io::Error::new(io::ErrorKind::NotFound, "no such interpreter"));
                }
                st.launches += 1;
                st.exits.push(tx);
                pid = 4000 + st.launches as u32;
            }
            let state = self.0.clone();
            Ok(LaunchedProcess {
                pid: Some(pid),
                stdout: None,
                stderr: None,
                exit: Box::pin(async move { Ok(rx.await.unwrap_or(Some(0))) }),
                signal: Box::new(move |sig| state.lock().unwrap().signals.push(sig)),
            })
        }
    }

    fn spec() -> LaunchSpec {
        LaunchSpec {
            command: PathBuf::from("python3"),
            args: vec!["bot.py".to_string()],
            cwd: PathBuf::from("/tmp"),
            env: Vec::new(),
        }
    }

    fn harness() -> (BotSupervisor, FakeLauncher, mpsc::UnboundedReceiver<BotExit>) {
        let launcher = FakeLauncher::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let sup = BotSupervisor::new(
            Arc::new(launcher.clone()),
            LogBroadcaster::default(),
            tx,
        );
        (sup, launcher, rx)
    }

    #[tokio::test]
    async fn handle_exists_iff_process_is_live() {
        let (sup, fake, mut rx) = harness();
        let bot = Uuid::new_v4();

        assert!(!sup.is_active(bot).await);
        sup.start(bot, spec()).await.unwrap();
        assert!(sup.is_active(bot).await);
        assert_eq!(sup.status(bot).await.unwrap().0, BotState::Running);

        fake.resolve_next_exit(Some(0));
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.bot_id, bot);
        assert_eq!(exit.exit_code, Some(0));
        assert!(!exit.stopping);
        assert!(!sup.is_active(bot).await);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (sup, _fake, _rx) = harness();
        let bot = Uuid::new_v4();
        sup.start(bot, spec()).await.unwrap();
        let err = sup.start(bot, spec()).await.unwrap_err();
        assert!(matches!(err, HostError::AlreadyRunning));
    }

    #[tokio::test]
    async fn stopping_a_non_running_bot_is_a_no_op() {
        let (sup, fake, _rx) = harness();
        let bot = Uuid::new_v4();
        let had_handle = sup.stop(bot, Duration::from_millis(200)).await.unwrap();
        assert!(!had_handle);
        assert!(fake.signals().is_empty());
    }

    #[tokio::test]
    async fn stop_terminates_and_reports_a_stopping_exit() {
        let (sup, fake, mut rx) = harness();
        let bot = Uuid::new_v4();
        sup.start(bot, spec()).await.unwrap();

        let fake2 = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fake2.resolve_next_exit(None);
        });

        let had_handle = sup.stop(bot, Duration::from_secs(5)).await.unwrap();
        assert!(had_handle);
        assert_eq!(fake.signals(), vec![Signal::Terminate]);

        let exit = rx.recv().await.unwrap();
        assert!(exit.stopping);
        assert!(!sup.is_active(bot).await);
    }

    #[tokio::test]
    async fn stop_escalates_to_kill_after_the_grace_window() {
        let (sup, fake, _rx) = harness();
        let bot = Uuid::new_v4();
        sup.start(bot, spec()).await.unwrap();

        // The fake never exits on SIGTERM.
        sup.stop(bot, Duration::from_millis(150)).await.unwrap();
        assert_eq!(fake.signals(), vec![Signal::Terminate, Signal::Kill]);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_handle_behind() {
        let (sup, fake, _rx) = harness();
        let bot = Uuid::new_v4();
        fake.fail_next();

        let err = sup.start(bot, spec()).await.unwrap_err();
        assert!(matches!(err, HostError::Spawn(_)));
        assert!(!sup.is_active(bot).await);

        // The id is reusable after the failure.
        sup.start(bot, spec()).await.unwrap();
        assert!(sup.is_active(bot).await);
    }

    #[tokio::test]
    async fn restart_cycle_never_overlaps_handles() {
        let (sup, fake, mut rx) = harness();
        let bot = Uuid::new_v4();

        sup.start(bot, spec()).await.unwrap();
        let fake2 = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            fake2.resolve_next_exit(None);
        });
        sup.stop(bot, Duration::from_secs(5)).await.unwrap();
        assert!(!sup.is_active(bot).await);
        let stop_exit = rx.recv().await.unwrap();
        assert!(stop_exit.stopping);

        sup.start(bot, spec()).await.unwrap();
        assert!(sup.is_active(bot).await);
        assert_eq!(fake.launches(), 2);
    }

    #[tokio::test]
    async fn crash_exit_reports_the_code() {
        let (sup, fake, mut rx) = harness();
        let bot = Uuid::new_v4();
        sup.start(bot, spec()).await.unwrap();

        fake.resolve_next_exit(Some(3));
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.exit_code, Some(3));
        assert!(!exit.stopping);
        assert!(exit.error.is_none());
    }
}
