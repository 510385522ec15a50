pub mod log_buffer;
pub mod models;
pub mod runtime;
pub mod store;

use crate::error::AppError;
use chrono::Utc;
use log_buffer::{LogBuffer, LogStream};
use models::{ProcessStatus, TerminalDefinition, TerminalDraft, TerminalView};
use runtime::{ExitReport, ProcessHandle, ShellLauncher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use store::DefinitionStore;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub log_capacity: usize,
    pub stop_grace_period: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            stop_grace_period: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
struct RuntimeState {
    status: ProcessStatus,
    process: Option<ProcessHandle>,
    /// Bumped on every successful start; reconciliation ignores stale runs.
    run: u64,
    accumulated: Duration,
    last_exit_code: Option<i32>,
}

impl RuntimeState {
    fn stopped() -> Self {
        Self {
            status: ProcessStatus::Stopped,
            process: None,
            run: 0,
            accumulated: Duration::ZERO,
            last_exit_code: None,
        }
    }

    fn running_time(&self) -> Duration {
        match &self.process {
            Some(process) if self.status == ProcessStatus::Running => {
                self.accumulated + process.started_at().elapsed()
            }
            _ => self.accumulated,
        }
    }

    /// Freezes timing and releases the process after an exit.
    fn finish(&mut self, status: ProcessStatus, report: &ExitReport) {
        if let Some(process) = self.process.take() {
            self.accumulated += report
                .exited_at
                .saturating_duration_since(process.started_at());
        }
        self.status = status;
        self.last_exit_code = report.code;
    }
}

/// One terminal's slot in the supervisor.
#[derive(Debug)]
struct TerminalEntry {
    /// Serializes start/stop/update/delete/reconcile for this id.
    lifecycle: TokioMutex<()>,
    /// Short-held; readers never wait on a lifecycle transition.
    state: StdMutex<RuntimeState>,
    logs: Arc<LogBuffer>,
}

impl TerminalEntry {
    fn new(log_capacity: usize) -> Self {
        Self {
            lifecycle: TokioMutex::new(()),
            state: StdMutex::new(RuntimeState::stopped()),
            logs: Arc::new(LogBuffer::new(log_capacity)),
        }
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ProcessStatus {
        self.state().status
    }

    fn view(&self, definition: TerminalDefinition) -> TerminalView {
        let state = self.state();
        let process = state
            .process
            .as_ref()
            .filter(|_| state.status == ProcessStatus::Running);
        TerminalView {
            id: definition.id,
            name: definition.name,
            path: definition.working_directory,
            command: definition.command,
            status: state.status,
            pid: process.map(|p| p.pid()),
            started_at: process.map(|p| p.started_at_wall().to_rfc3339()),
            created_at: definition.created_at,
            last_run: definition.last_run,
            running_time: state.running_time().as_secs(),
            last_exit_code: state.last_exit_code,
        }
    }

    /// Settles a run whose child was already reaped but whose output may
    /// still be draining. Caller holds `lifecycle`.
    fn settle_exited(&self, terminal_id: &str) {
        let exited = {
            let state = self.state();
            match (&state.process, state.status) {
                (Some(process), ProcessStatus::Running) => {
                    process.exit_report().map(|report| (state.run, report))
                }
                _ => None,
            }
        };
        if let Some((run, report)) = exited {
            self.apply_natural_exit(terminal_id, run, &report);
        }
    }

    /// Applies an exit nobody asked for. Caller holds `lifecycle`.
    fn apply_natural_exit(&self, terminal_id: &str, run: u64, report: &ExitReport) -> bool {
        let mut state = self.state();
        if state.run != run || state.status != ProcessStatus::Running {
            return false;
        }
        let status = if report.success() {
            ProcessStatus::Stopped
        } else {
            ProcessStatus::Error
        };
        state.finish(status, report);
        info!(id = %terminal_id, status = status.as_str(), exit_code = ?report.code, signal = ?report.signal, "Process exited on its own");
        true
    }
}

/// Owns every terminal's runtime state and serializes lifecycle transitions per id.
#[derive(Debug)]
pub struct Supervisor {
    store: DefinitionStore,
    entries: StdRwLock<HashMap<String, Arc<TerminalEntry>>>,
    launcher: ShellLauncher,
    settings: SupervisorSettings,
}

impl Supervisor {
    /// Builds the supervisor over an opened store.
    ///
    /// Children never survive a restart, so every persisted definition starts
    /// out Stopped whatever an older file recorded, and nothing is reattached.
    pub fn new(store: DefinitionStore, launcher: ShellLauncher, settings: SupervisorSettings) -> Self {
        let entries: HashMap<String, Arc<TerminalEntry>> = store
            .list()
            .into_iter()
            .map(|d| (d.id, Arc::new(TerminalEntry::new(settings.log_capacity))))
            .collect();
        info!(terminals = entries.len(), shell = %launcher.shell(), "Supervisor ready; all terminals reconciled to stopped");

        Self {
            store,
            entries: StdRwLock::new(entries),
            launcher,
            settings,
        }
    }

    fn entry(&self, id: &str) -> Result<Arc<TerminalEntry>, AppError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    fn view_of(&self, definition: TerminalDefinition) -> TerminalView {
        match self.entry(&definition.id) {
            Ok(entry) => entry.view(definition),
            // Created concurrently and not registered yet.
            Err(_) => TerminalEntry::new(1).view(definition),
        }
    }

    #[instrument(skip(self))]
    pub fn get_terminals(&self) -> Vec<TerminalView> {
        self.store
            .list()
            .into_iter()
            .map(|d| self.view_of(d))
            .collect()
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn add_terminal(&self, draft: TerminalDraft) -> Result<TerminalView, AppError> {
        let definition = self.store.create(&draft).await?;
        let entry = Arc::new(TerminalEntry::new(self.settings.log_capacity));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id.clone(), entry.clone());
        info!(id = %definition.id, name = %definition.name, "Terminal added");
        Ok(entry.view(definition))
    }

    #[instrument(skip(self, draft))]
    pub async fn update_terminal(&self, id: &str, draft: TerminalDraft) -> Result<TerminalView, AppError> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        entry.settle_exited(id);
        if entry.status() == ProcessStatus::Running {
            return Err(AppError::AlreadyRunning(id.to_string()));
        }
        let definition = self.store.update(id, &draft).await?;
        info!(id = %id, "Terminal updated");
        Ok(entry.view(definition))
    }

    #[instrument(skip(self))]
    pub async fn delete_terminal(&self, id: &str) -> Result<(), AppError> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        entry.settle_exited(id);
        if entry.status() == ProcessStatus::Running {
            return Err(AppError::AlreadyRunning(id.to_string()));
        }
        self.store.delete(id).await?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        info!(id = %id, "Terminal deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn start_process(&self, id: &str) -> Result<(), AppError> {
        let entry = self.entry(id)?;
        let lifecycle = entry.lifecycle.lock().await;
        // Deleted while we waited for the lock.
        let definition = self.store.get(id)?;

        entry.settle_exited(id);
        if entry.status() == ProcessStatus::Running {
            return Err(AppError::AlreadyRunning(id.to_string()));
        }

        let spawned = self.launcher.spawn(
            id,
            &definition.working_directory,
            &definition.command,
            entry.logs.clone(),
        );
        let process = match spawned {
            Ok(process) => process,
            Err(err) => {
                entry.logs.append(LogStream::Stderr, err.to_string());
                let mut state = entry.state();
                state.status = ProcessStatus::Error;
                state.process = None;
                state.accumulated = Duration::ZERO;
                state.last_exit_code = None;
                return Err(err);
            }
        };

        let run = {
            let mut state = entry.state();
            state.run += 1;
            state.status = ProcessStatus::Running;
            state.accumulated = Duration::ZERO;
            state.last_exit_code = None;
            state.process = Some(process.clone());
            state.run
        };

        let watched = entry.clone();
        let terminal_id = id.to_string();
        tokio::spawn(async move {
            let report = process.wait().await;
            let _lifecycle = watched.lifecycle.lock().await;
            if !watched.apply_natural_exit(&terminal_id, run, &report) {
                debug!(id = %terminal_id, run, "Exit already accounted for");
            }
        });
        drop(lifecycle);

        // The run is already observable; the timestamp write needs no lifecycle lock.
        if let Err(e) = self.store.record_last_run(id, &Utc::now().to_rfc3339()).await {
            warn!(id = %id, error = %e, "Failed to persist last_run");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop_process(&self, id: &str) -> Result<(), AppError> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;

        let (process, run) = {
            let state = entry.state();
            match (&state.process, state.status) {
                (Some(process), ProcessStatus::Running) => (process.clone(), state.run),
                _ => return Err(AppError::NotRunning(id.to_string())),
            }
        };

        // Exited on its own before we got here, even if its output is still
        // draining: that outcome stands.
        if let Some(report) = process.exit_report() {
            entry.apply_natural_exit(id, run, &report);
            return Err(AppError::NotRunning(id.to_string()));
        }

        let report = process.terminate(self.settings.stop_grace_period).await;
        entry.state().finish(ProcessStatus::Stopped, &report);
        info!(id = %id, pid = process.pid(), exit_code = ?report.code, signal = ?report.signal, "Process stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get_logs(&self, id: &str) -> Result<Vec<String>, AppError> {
        Ok(self.entry(id)?.logs.rendered())
    }

    pub fn get_process_status(&self, id: &str) -> Result<ProcessStatus, AppError> {
        Ok(self.entry(id)?.status())
    }

    /// Stops every running terminal concurrently. Used when the supervisor itself exits.
    pub async fn shutdown(self: Arc<Self>) {
        let running: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| entry.status() == ProcessStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();

        if running.is_empty() {
            return;
        }
        info!(count = running.len(), "Stopping running terminals before exit");

        let mut stops = JoinSet::new();
        for id in running {
            let supervisor = self.clone();
            stops.spawn(async move {
                if let Err(e) = supervisor.stop_process(&id).await {
                    debug!(id = %id, error = %e, "Terminal was not running at shutdown");
                }
            });
        }
        while let Some(joined) = stops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Stop task failed during shutdown");
            }
        }
    }
}
