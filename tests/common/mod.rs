//! Shared fixtures for supervisor integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use superterminals::supervisor::models::{ProcessStatus, TerminalDraft, TerminalView};
use superterminals::supervisor::runtime::ShellLauncher;
use superterminals::supervisor::store::DefinitionStore;
use superterminals::{Supervisor, SupervisorSettings};
use tempfile::TempDir;

pub const GRACE: Duration = Duration::from_millis(500);

/// A supervisor backed by a throwaway data directory.
pub struct Fixture {
    pub dir: TempDir,
    pub supervisor: Arc<Supervisor>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(log_capacity: usize) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let supervisor = open_supervisor(&dir, log_capacity);
        Self { dir, supervisor }
    }

    pub fn draft(&self, name: &str, command: &str) -> TerminalDraft {
        TerminalDraft {
            name: name.to_string(),
            path: self.dir.path().to_string_lossy().into_owned(),
            command: command.to_string(),
        }
    }

    pub async fn add(&self, name: &str, command: &str) -> TerminalView {
        self.supervisor
            .add_terminal(self.draft(name, command))
            .await
            .expect("Failed to add terminal")
    }

    pub fn view(&self, id: &str) -> TerminalView {
        self.supervisor
            .get_terminals()
            .into_iter()
            .find(|t| t.id == id)
            .expect("Terminal missing from get_terminals")
    }

    /// Polls `get_terminals` until `id` reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: ProcessStatus) -> TerminalView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let view = self.view(id);
            if view.status == status {
                return view;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {:?}; last view: {:?}",
                status,
                view
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls `get_logs` until a line equal to `expected` shows up.
    pub async fn wait_for_log(&self, id: &str, expected: &str) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let logs = self.supervisor.get_logs(id).expect("get_logs failed");
            if logs.iter().any(|l| l == expected) {
                return logs;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for log line {:?}; got {:?}",
                expected,
                logs
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn open_supervisor(dir: &TempDir, log_capacity: usize) -> Arc<Supervisor> {
    let store =
        DefinitionStore::open(dir.path().join("terminals.json")).expect("Failed to open store");
    Arc::new(Supervisor::new(
        store,
        ShellLauncher::new("/bin/sh", false, Vec::new()),
        SupervisorSettings {
            log_capacity,
            stop_grace_period: GRACE,
        },
    ))
}

/// Asks the OS whether `pid` still exists.
pub fn pid_alive(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}
