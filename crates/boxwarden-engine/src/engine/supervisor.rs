//! Process supervisor – start/stop state machine over the engine process.
//!
//! Two launch routes:
//!
//! | Route    | When                      | Ownership        | Exit detection            |
//! |----------|---------------------------|------------------|---------------------------|
//! | Direct   | host already elevated     | owned `Child`    | watcher task on `wait()`  |
//! | Elevated | host lacks privileges     | relinquished     | process-table poll by name |
//!
//! The state lock is never held across a spawn, an elevation request or a
//! process-table scan. `Starting`/`Stopping` mark the window in which the
//! lock is released; a `run_id` ties background tasks to the launch that
//! created them.

use crate::engine::elevation::ElevationGateway;
use crate::engine::layout::EngineLayout;
use crate::engine::process::{self, ProcessProbe, TerminateOutcome};
use crate::engine::sink::EventLog;
use crate::engine::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    Idle,
    Starting,
    Running { elevated: bool },
    Stopping,
}

type KillReply = oneshot::Sender<std::io::Result<()>>;

/// Handle to a directly spawned child. The child itself lives in its
/// watcher task; killing goes through `kill_tx`.
struct OwnedProcess {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<KillReply>,
}

struct ProcessState {
    phase: ProcessPhase,
    owned: Option<OwnedProcess>,
    run_id: u64,
}

pub struct ProcessSupervisor {
    layout: EngineLayout,
    gateway: Arc<dyn ElevationGateway>,
    probe: Arc<dyn ProcessProbe>,
    events: EventLog,
    liveness_interval: Duration,
    state: Arc<RwLock<ProcessState>>,
    shutdown: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    pub fn new(
        layout: EngineLayout,
        gateway: Arc<dyn ElevationGateway>,
        probe: Arc<dyn ProcessProbe>,
        events: EventLog,
        liveness_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            layout,
            gateway,
            probe,
            events,
            liveness_interval,
            state: Arc::new(RwLock::new(ProcessState {
                phase: ProcessPhase::Idle,
                owned: None,
                run_id: 0,
            })),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn phase(&self) -> ProcessPhase {
        self.state.read().await.phase
    }

    pub async fn is_running(&self) -> bool {
        matches!(self.phase().await, ProcessPhase::Running { .. })
    }

    /// Run state contributed by the supervisor; `None` while idle.
    pub async fn run_state(&self) -> Option<RunState> {
        match self.phase().await {
            ProcessPhase::Idle => None,
            ProcessPhase::Starting => Some(RunState::Starting),
            ProcessPhase::Running { .. } => Some(RunState::Running),
            ProcessPhase::Stopping => Some(RunState::Stopping),
        }
    }

    /// Pid of the owned child, if the engine was launched directly.
    pub async fn owned_pid(&self) -> Option<u32> {
        self.state.read().await.owned.as_ref().and_then(|o| o.pid)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Start
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Start the engine. `available` is the availability monitor's verdict.
    pub async fn start(&self, available: bool) -> Result<(), EngineError> {
        let run_id = {
            let mut st = self.state.write().await;
            match st.phase {
                ProcessPhase::Running { .. } => return Ok(()),
                ProcessPhase::Starting | ProcessPhase::Stopping => {
                    return Err(EngineError::new(
                        EngineErrorKind::InvalidState,
                        "A start or stop is already in progress",
                    ))
                }
                ProcessPhase::Idle => {}
            }
            self.check_preconditions(available)?;
            st.phase = ProcessPhase::Starting;
            st.run_id += 1;
            st.run_id
        };

        let gateway = self.gateway.clone();
        let elevated = tokio::task::spawn_blocking(move || gateway.is_elevated())
            .await
            .unwrap_or(false);

        let result = if elevated {
            self.start_direct(run_id).await
        } else {
            self.start_elevated(run_id).await
        };

        if let Err(e) = &result {
            self.events.error(format!("Failed to start {}: {}", self.layout.engine_name(), e));
            let mut st = self.state.write().await;
            if st.run_id == run_id && st.phase == ProcessPhase::Starting {
                st.phase = ProcessPhase::Idle;
            }
        }
        result
    }

    fn check_preconditions(&self, available: bool) -> Result<(), EngineError> {
        let name = self.layout.binary_file_name();
        if !available {
            return Err(EngineError::new(
                EngineErrorKind::NotAvailable,
                format!("{} is not available", name),
            ));
        }
        if !self.layout.binary_exists() {
            return Err(EngineError::new(
                EngineErrorKind::BinaryMissing,
                format!("{} not found", name),
            )
            .with_detail(self.layout.binary_path().display().to_string()));
        }
        if !self.layout.config_exists() {
            return Err(EngineError::new(
                EngineErrorKind::ConfigMissing,
                format!(
                    "{} not found - please update configuration first",
                    crate::engine::layout::CONFIG_FILE
                ),
            ));
        }
        Ok(())
    }

    async fn start_direct(&self, run_id: u64) -> Result<(), EngineError> {
        let name = self.layout.engine_name().to_string();
        self.events.info(format!(
            "Already running with admin privileges, starting {} directly",
            name
        ));

        let child = process::spawn_direct(&self.layout, &self.events)?;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();

        {
            let mut st = self.state.write().await;
            st.phase = ProcessPhase::Running { elevated: false };
            st.owned = Some(OwnedProcess { pid, kill_tx });
        }
        self.events.info(format!("{} process started successfully", name));
        if let Some(pid) = pid {
            log::debug!("{} pid {}", name, pid);
        }

        let handle = tokio::spawn(watch_child(
            child,
            kill_rx,
            run_id,
            self.state.clone(),
            self.events.clone(),
            name,
        ));
        self.track(handle).await;
        Ok(())
    }

    async fn start_elevated(&self, run_id: u64) -> Result<(), EngineError> {
        let name = self.layout.engine_name().to_string();
        self.events.info(format!(
            "Admin privileges required, launching {} with elevation...",
            name
        ));
        process::prepare_log_file(&self.layout).await?;

        let request = process::elevated_launch_request(&self.layout);
        let gateway = self.gateway.clone();
        tokio::task::spawn_blocking(move || gateway.run_elevated(&request))
            .await
            .map_err(|e| {
                EngineError::new(EngineErrorKind::Internal, "Elevation task failed")
                    .with_detail(e.to_string())
            })??;

        {
            let mut st = self.state.write().await;
            st.phase = ProcessPhase::Running { elevated: true };
            st.owned = None;
        }
        self.events
            .info(format!("{} launched with elevation", name));
        self.events.info(format!(
            "Monitoring {} logs from: {}/{}.log",
            name,
            crate::engine::layout::LOG_DIR,
            name
        ));

        let handle = tokio::spawn(poll_liveness(
            run_id,
            self.state.clone(),
            self.probe.clone(),
            self.layout.binary_file_name(),
            self.liveness_interval,
            self.shutdown.clone(),
            self.events.clone(),
            name,
        ));
        self.track(handle).await;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Stop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Stop the engine. A no-op unless it is running.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (owned, previous) = {
            let mut st = self.state.write().await;
            let previous = match st.phase {
                ProcessPhase::Running { .. } => st.phase,
                _ => return Ok(()),
            };
            st.phase = ProcessPhase::Stopping;
            (st.owned.take(), previous)
        };

        let result = match owned {
            Some(owned) => {
                self.kill_owned(owned).await;
                Ok(())
            }
            None => self.kill_elevated().await,
        };

        let mut st = self.state.write().await;
        match &result {
            Ok(()) => {
                st.phase = ProcessPhase::Idle;
                drop(st);
                self.events
                    .info(format!("{} process stopped", self.layout.engine_name()));
            }
            Err(_) => st.phase = previous,
        }
        result
    }

    /// Kill failures are logged only; the child is gone from our view
    /// either way.
    async fn kill_owned(&self, owned: OwnedProcess) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if owned.kill_tx.send(reply_tx).is_err() {
            // watcher already saw the exit
            return;
        }
        match reply_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .events
                .error(format!("Error killing direct process: {}", e)),
            Err(_) => {}
        }
    }

    async fn kill_elevated(&self) -> Result<(), EngineError> {
        let name = self.layout.engine_name().to_string();
        let image = self.layout.binary_file_name();
        self.events
            .info(format!("Stopping elevated {} process...", name));

        let request = process::elevated_terminate_request(&image);
        let gateway = self.gateway.clone();
        let elevated = tokio::task::spawn_blocking(move || gateway.run_elevated(&request))
            .await
            .map_err(|e| {
                EngineError::new(EngineErrorKind::Internal, "Elevation task failed")
                    .with_detail(e.to_string())
            })
            .and_then(|r| r);

        let err = match elevated {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        self.events
            .error(format!("Error stopping elevated process: {}", err));
        self.events.info("Trying regular termination as fallback...");

        let probe = self.probe.clone();
        let fallback = tokio::task::spawn_blocking(move || probe.terminate(&image))
            .await
            .map_err(|e| {
                EngineError::new(EngineErrorKind::Internal, "Termination task failed")
                    .with_detail(e.to_string())
            })
            .and_then(|r| r);

        match fallback {
            Ok(TerminateOutcome::NotRunning) => {
                self.events.info(format!("{} process was not running", name));
                Ok(())
            }
            Ok(TerminateOutcome::Terminated(n)) => {
                self.events.info(format!(
                    "Successfully terminated {} process ({})",
                    name, n
                ));
                Ok(())
            }
            Err(fallback_err) => {
                self.events
                    .error(format!("Fallback also failed: {}", fallback_err));
                Err(err)
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Background tasks
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Wait for watcher and poller tasks to finish.
    pub async fn join_background(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
    }
}

/// Owns the child until it exits or a kill request arrives.
async fn watch_child(
    mut child: tokio::process::Child,
    kill_rx: oneshot::Receiver<KillReply>,
    run_id: u64,
    state: Arc<RwLock<ProcessState>>,
    events: EventLog,
    name: String,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(s) if s.success() => events.info(format!("{} process exited", name)),
                Ok(s) => events.warn(format!("{} process exited with error: {}", name, s)),
                Err(e) => events.warn(format!("{} process exited with error: {}", name, e)),
            }
            let mut st = state.write().await;
            if st.run_id == run_id {
                st.owned = None;
                if matches!(st.phase, ProcessPhase::Running { elevated: false }) {
                    st.phase = ProcessPhase::Idle;
                }
            }
        }
        Ok(reply) = kill_rx => {
            let _ = reply.send(child.kill().await);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_liveness(
    run_id: u64,
    state: Arc<RwLock<ProcessState>>,
    probe: Arc<dyn ProcessProbe>,
    image: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    events: EventLog,
    name: String,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            return;
        }
        {
            let st = state.read().await;
            if st.run_id != run_id {
                return;
            }
            match st.phase {
                ProcessPhase::Running { elevated: true } => {}
                // a failed stop restores Running; keep watching until then
                ProcessPhase::Stopping => continue,
                _ => return,
            }
        }

        let probe = probe.clone();
        let image = image.clone();
        let alive = tokio::task::spawn_blocking(move || probe.is_running(&image))
            .await
            .unwrap_or(true);
        if alive {
            continue;
        }

        let mut st = state.write().await;
        if st.run_id == run_id && st.phase == (ProcessPhase::Running { elevated: true }) {
            st.phase = ProcessPhase::Idle;
            events.info(format!("{} process has stopped", name));
        }
        return;
    }
}
