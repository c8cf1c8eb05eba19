use crate::CoreError;
use labcycle_schema::keys::STUDENT_NAME;
use labcycle_schema::ConfigStore;
use labcycle_store::{ResetJournal, ResetPhase, WorkspaceLayout};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Coarse stage of a workspace, derived from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninstalled,
    Installed,
    Personalized,
    /// Personalized and the application has produced logs or data.
    /// Advisory only: no operation requires or refuses it specifically.
    Active,
    /// A soft reset stopped while purging durable data.
    ResetPending,
    /// A soft reset purged durable data but did not rewrite configuration.
    Reset,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninstalled => write!(f, "uninstalled"),
            LifecycleState::Installed => write!(f, "installed"),
            LifecycleState::Personalized => write!(f, "personalized"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::ResetPending => write!(f, "reset-pending"),
            LifecycleState::Reset => write!(f, "reset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Install,
    Personalize,
    SoftReset,
    HardReset,
    Clean,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install => write!(f, "install"),
            Operation::Personalize => write!(f, "personalize"),
            Operation::SoftReset => write!(f, "soft-reset"),
            Operation::HardReset => write!(f, "hard-reset"),
            Operation::Clean => write!(f, "clean"),
        }
    }
}

/// Check that `operation` may run from `from` and return the resulting state.
pub fn validate_transition(
    operation: Operation,
    from: LifecycleState,
) -> Result<LifecycleState, CoreError> {
    use LifecycleState::{Active, Installed, Personalized, Reset, ResetPending, Uninstalled};

    match (operation, from) {
        (Operation::HardReset, _) => Ok(Uninstalled),
        // An interrupted soft reset was already confirmed; install finishes it.
        (Operation::SoftReset | Operation::Install, ResetPending | Reset) => Ok(Installed),
        (Operation::SoftReset, Installed | Personalized | Active) => Ok(Installed),
        (Operation::Install, Uninstalled) => Ok(Installed),
        // Re-running install repairs in place and keeps personalization.
        (Operation::Install, Installed | Personalized | Active) => Ok(from),
        (Operation::Personalize, Installed | Personalized | Active) => Ok(Personalized),
        (Operation::Clean, Installed | Personalized | Active) => Ok(from),
        (Operation::Personalize | Operation::SoftReset | Operation::Clean, Uninstalled) => {
            Err(CoreError::NotInstalled)
        }
        (Operation::Personalize | Operation::Clean, ResetPending | Reset) => {
            Err(CoreError::UnfinishedReset(from.to_string()))
        }
    }
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

/// Derive the lifecycle state of a workspace from its markers and contents.
pub fn observe(layout: &WorkspaceLayout) -> LifecycleState {
    if !layout.root().is_dir() {
        return LifecycleState::Uninstalled;
    }
    if let Some(marker) = ResetJournal::new(layout).current() {
        return match marker.phase {
            ResetPhase::Purging => LifecycleState::ResetPending,
            ResetPhase::Purged => LifecycleState::Reset,
        };
    }
    if !layout.is_installed() {
        return LifecycleState::Uninstalled;
    }
    let personalized = ConfigStore::load(&layout.config_file())
        .is_ok_and(|store| store.get(STUDENT_NAME).is_some_and(|v| !v.is_empty()));
    if !personalized {
        return LifecycleState::Installed;
    }
    if has_entries(&layout.logs_dir()) || has_entries(&layout.data_dir()) {
        LifecycleState::Active
    } else {
        LifecycleState::Personalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn valid_transitions() {
        assert_eq!(validate_transition(Operation::Install, Uninstalled).unwrap(), Installed);
        assert_eq!(validate_transition(Operation::Install, Installed).unwrap(), Installed); // idempotent repair
        assert_eq!(
            validate_transition(Operation::Install, Personalized).unwrap(),
            Personalized
        );
        assert_eq!(
            validate_transition(Operation::Personalize, Installed).unwrap(),
            Personalized
        );
        assert_eq!(
            validate_transition(Operation::Personalize, Active).unwrap(),
            Personalized
        );
        for from in [Installed, Personalized, Active, ResetPending, Reset] {
            assert_eq!(validate_transition(Operation::SoftReset, from).unwrap(), Installed);
        }
        for from in [Uninstalled, Installed, Personalized, Active, ResetPending, Reset] {
            assert_eq!(validate_transition(Operation::HardReset, from).unwrap(), Uninstalled);
        }
        assert_eq!(validate_transition(Operation::Clean, Active).unwrap(), Active);
        for from in [ResetPending, Reset] {
            assert_eq!(validate_transition(Operation::Install, from).unwrap(), Installed);
        }
    }

    #[test]
    fn invalid_transitions() {
        assert!(matches!(
            validate_transition(Operation::Personalize, Uninstalled),
            Err(CoreError::NotInstalled)
        ));
        assert!(matches!(
            validate_transition(Operation::SoftReset, Uninstalled),
            Err(CoreError::NotInstalled)
        ));
        assert!(matches!(
            validate_transition(Operation::Clean, Uninstalled),
            Err(CoreError::NotInstalled)
        ));
        assert!(matches!(
            validate_transition(Operation::Personalize, Reset),
            Err(CoreError::UnfinishedReset(_))
        ));
        assert!(validate_transition(Operation::Clean, Reset).is_err());
    }

    #[test]
    fn observe_follows_markers_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().join("ws"), dir.path().join("bk"));
        assert_eq!(observe(&layout), Uninstalled);

        labcycle_store::ensure(&layout).unwrap();
        assert_eq!(observe(&layout), Uninstalled);

        layout.write_install_marker().unwrap();
        assert_eq!(observe(&layout), Installed);

        std::fs::write(layout.config_file(), "STUDENT_NAME=Ada\n").unwrap();
        assert_eq!(observe(&layout), Personalized);

        std::fs::write(layout.data_dir().join("weather.db"), "db").unwrap();
        assert_eq!(observe(&layout), Active);

        let journal = ResetJournal::new(&layout);
        journal.begin(None).unwrap();
        assert_eq!(observe(&layout), ResetPending);
        journal.advance(ResetPhase::Purged).unwrap();
        assert_eq!(observe(&layout), Reset);
    }
}
