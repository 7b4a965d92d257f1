//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Engine run-state machine driven by remote commands."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::EngineStatus;

/// Remote run-state command. Parsing is exact and case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum EngineCommand {
    Start,
    Stop,
}

/// Effect of applying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// STOPPED -> RUNNING.
    Started,
    /// START while already running; the run-start reference moved to now.
    Restarted,
    /// RUNNING -> STOPPED.
    Stopped,
    /// STOP while already stopped.
    Unchanged,
}

/// RUNNING/STOPPED state together with the run-start reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    status: EngineStatus,
    started_at_ms: u64,
}

impl RunState {
    pub fn running_since(started_at_ms: u64) -> Self {
        Self {
            status: EngineStatus::Running,
            started_at_ms,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: EngineStatus::Stopped,
            started_at_ms: 0,
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.is_running().then_some(self.started_at_ms)
    }

    pub fn apply(&mut self, command: EngineCommand, now_ms: u64) -> Transition {
        match (command, self.status) {
            (EngineCommand::Start, EngineStatus::Stopped) => {
                *self = Self::running_since(now_ms);
                Transition::Started
            }
            (EngineCommand::Start, EngineStatus::Running) => {
                self.started_at_ms = now_ms;
                Transition::Restarted
            }
            (EngineCommand::Stop, EngineStatus::Running) => {
                *self = Self::stopped();
                Transition::Stopped
            }
            (EngineCommand::Stop, EngineStatus::Stopped) => Transition::Unchanged,
        }
    }

    /// Run time since the last start; zero while stopped.
    pub fn active_time(&self, now_ms: u64) -> Duration {
        match self.started_at_ms() {
            Some(started) => Duration::from_millis(now_ms.saturating_sub(started)),
            None => Duration::ZERO,
        }
    }
}
