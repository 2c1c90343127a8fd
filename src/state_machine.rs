//! The container lifecycle state machine: tagged state variants with
//! guarded transitions (spec §4.5).
//!
//! Grounded on `containers-youki`'s `can_start`/`can_kill`/`can_delete`/
//! `can_pause`/`can_resume` predicate style and `kata-containers runk`'s
//! `Container::destroy`/`pause`/`resume` guard checks, translated into the
//! "state-machine nodes as variants" redesign note (§9) rather than a
//! trait-object hierarchy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The four statuses [`crate::container::Container::status`] can report.
/// `Restored` is not a distinct status — it reports `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Created => write!(f, "created"),
            Status::Running => write!(f, "running"),
            Status::Paused => write!(f, "paused"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

/// A lifecycle state node. Each node knows its own status and which
/// transitions are legal out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Stopped,
    Created,
    Running,
    Paused,
    /// Reached only via a C/R `post-restore` notification.
    Restored { image_dir: PathBuf },
}

impl State {
    pub fn status(&self) -> Status {
        match self {
            State::Stopped => Status::Stopped,
            State::Created => Status::Created,
            State::Running => Status::Running,
            State::Paused => Status::Paused,
            State::Restored { .. } => Status::Running,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            State::Stopped => "stopped",
            State::Created => "created",
            State::Running => "running",
            State::Paused => "paused",
            State::Restored { .. } => "restored",
        }
    }

    /// Transition guard for `exec()`: Created -> Running.
    pub fn to_running(&self) -> Result<State> {
        match self {
            State::Created => Ok(State::Running),
            _ => Err(illegal(self, "exec")),
        }
    }

    /// Transition guard for `pause()`: {Running, Created} -> Paused.
    pub fn to_paused(&self) -> Result<State> {
        match self {
            State::Running | State::Created => Ok(State::Paused),
            _ => Err(illegal(self, "pause")),
        }
    }

    /// Transition guard for `resume()`: Paused -> Running.
    pub fn to_resumed(&self) -> Result<State> {
        match self {
            State::Paused => Ok(State::Running),
            _ => Err(Error::NotPaused),
        }
    }

    /// Transition guard for `destroy()`: any state may transition to
    /// Stopped; this is the only transition allowed to be idempotent (a
    /// second `destroy()` on an already-`Stopped` node succeeds as a
    /// no-op).
    pub fn to_destroyed(&self) -> State {
        State::Stopped
    }

    /// Whether `start(init)` is legal from this node (only a fresh,
    /// never-started container, which the caller represents by having no
    /// persisted state at all — this guard exists for completeness when a
    /// `State` value is available, e.g. re-entrant `start` calls).
    pub fn can_start(&self) -> bool {
        matches!(self, State::Stopped)
    }

    pub fn can_signal(&self) -> bool {
        matches!(self, State::Running | State::Created | State::Paused)
    }

    /// `post-restore` reaches `Restored` only from `Created` (a restore is
    /// itself a kind of start).
    pub fn to_restored(&self, image_dir: PathBuf) -> Result<State> {
        match self {
            State::Created => Ok(State::Restored { image_dir }),
            _ => Err(illegal(self, "restore")),
        }
    }
}

fn illegal(from: &State, action: &'static str) -> Error {
    Error::IllegalTransition {
        from: from.label(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_can_exec_to_running() {
        assert_eq!(State::Created.to_running().unwrap(), State::Running);
    }

    #[test]
    fn running_cannot_exec_again() {
        assert!(State::Running.to_running().is_err());
    }

    #[test]
    fn running_and_created_can_pause() {
        assert_eq!(State::Running.to_paused().unwrap(), State::Paused);
        assert_eq!(State::Created.to_paused().unwrap(), State::Paused);
    }

    #[test]
    fn stopped_cannot_pause() {
        let err = State::Stopped.to_paused().unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }

    #[test]
    fn only_paused_can_resume() {
        assert_eq!(State::Paused.to_resumed().unwrap(), State::Running);
        assert!(matches!(
            State::Running.to_resumed().unwrap_err(),
            Error::NotPaused
        ));
    }

    #[test]
    fn destroy_is_idempotent() {
        assert_eq!(State::Stopped.to_destroyed(), State::Stopped);
        assert_eq!(State::Running.to_destroyed(), State::Stopped);
    }

    #[test]
    fn restored_reports_running_status() {
        let s = State::Restored {
            image_dir: PathBuf::from("/tmp/img"),
        };
        assert_eq!(s.status(), Status::Running);
    }

    #[test]
    fn restore_only_legal_from_created() {
        assert!(State::Created.to_restored(PathBuf::from("/tmp/img")).is_ok());
        assert!(State::Running.to_restored(PathBuf::from("/tmp/img")).is_err());
    }
}
