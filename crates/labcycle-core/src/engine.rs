use crate::confirm::{Operator, HARD_RESET_PHRASE};
use crate::interrupt::shutdown_requested;
use crate::lifecycle::{observe, validate_transition, LifecycleState, Operation};
use crate::secrets::SecretProvisioner;
use crate::CoreError;
use labcycle_host::{check_prereqs, Detector};
use labcycle_schema::keys::{EXPERIENCE_LEVEL, SENSOR_SIMULATION, SENSOR_TYPE, STUDENT_NAME};
use labcycle_schema::{
    apply_defaults, seed_install_defaults, ConfigStore, DefaultsPolicy, Personalization,
    PlatformProfile, SchemaError, SECRET_KEYS,
};
use labcycle_store::{
    audit_permissions, discard_root, ensure, list_backups, purge_durable, purge_transient,
    snapshot, sweep_trash, write_secret_file, BackupArchive, BackupIdentity, PermissionIssue,
    PurgeReport, ResetJournal, ResetMarker, ResetPhase, StoreError, WorkspaceLayout,
    WorkspaceReport,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const CONFIG_HEADER: &str =
    "# Weather station configuration. Managed by labcycle; secrets are regenerated on soft reset.";

/// What to do about a backup before a destructive step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupMode {
    #[default]
    Skip,
    /// Take a backup; a failure becomes a warning and the operation goes on.
    BestEffort,
    /// Take a backup; a failure aborts before anything is destroyed.
    Required,
}

#[derive(Debug, Clone)]
pub struct ResetOptions {
    pub backup: BackupMode,
    /// Identity used in the backup archive name.
    pub owner: String,
}

/// Outcome of one lifecycle operation, including every warning collected
/// along the way.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub profile: PlatformProfile,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
    pub backup: Option<BackupArchive>,
    pub purge: Option<PurgeReport>,
    pub workspace: Option<WorkspaceReport>,
}

impl OperationReport {
    fn new(operation: Operation, from: LifecycleState, profile: PlatformProfile) -> Self {
        Self {
            operation,
            from,
            to: from,
            profile,
            warnings: Vec::new(),
            notes: Vec::new(),
            backup: None,
            purge: None,
            workspace: None,
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn note(&mut self, message: String) {
        debug!("{message}");
        self.notes.push(message);
    }

    fn record_workspace(&mut self, workspace: WorkspaceReport) {
        for path in &workspace.permissions_fixed {
            self.warnings
                .push(format!("repaired permissions on {}", path.display()));
        }
        if let Some(err) = &workspace.backup_root_error {
            self.warnings.push(format!(
                "backup root unavailable, backups will fail: {err}"
            ));
        }
        if !workspace.created.is_empty() {
            self.notes.push(format!(
                "created {} workspace directories",
                workspace.created.len()
            ));
        }
        self.workspace = Some(workspace);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: LifecycleState,
    pub profile: PlatformProfile,
    pub root: PathBuf,
    pub backup_root: PathBuf,
    pub installed_at: Option<String>,
    pub reset: Option<ResetMarker>,
    pub sensor: Option<String>,
    pub simulation: Option<String>,
    pub student: Option<String>,
    pub missing_secrets: Vec<String>,
    pub permission_issues: Vec<PermissionIssue>,
    pub backups: usize,
}

impl StatusReport {
    /// Problems an operator should act on.
    pub fn findings(&self) -> Vec<String> {
        let mut findings = Vec::new();
        if let Some(reset) = &self.reset {
            findings.push(format!(
                "soft reset unfinished ({}); re-run `labcycle soft-reset`",
                reset.phase
            ));
        }
        let installed = !matches!(self.state, LifecycleState::Uninstalled);
        if installed && !self.missing_secrets.is_empty() {
            findings.push(format!(
                "missing secrets: {}; run `labcycle install` to repair",
                self.missing_secrets.join(", ")
            ));
        }
        for issue in &self.permission_issues {
            findings.push(issue.to_string());
        }
        if !self.profile.supports_hardware_interfaces()
            && self.simulation.as_deref().is_some_and(|s| s != "true")
        {
            findings.push(format!(
                "{SENSOR_SIMULATION} is not enabled on a simulation-only host; run `labcycle install` to repair"
            ));
        }
        findings
    }
}

/// Orchestrates lifecycle operations on one workspace.
///
/// The platform is detected once at the start of every operation. Steps that
/// need randomness run before the first write, and secrets are only persisted
/// after a purge has succeeded.
pub struct Lifecycle {
    layout: WorkspaceLayout,
    detector: Box<dyn Detector>,
    policy: DefaultsPolicy,
    secrets: SecretProvisioner,
    should_stop: Box<dyn Fn() -> bool>,
}

impl Lifecycle {
    pub fn new(layout: WorkspaceLayout, detector: Box<dyn Detector>) -> Self {
        Self {
            layout,
            detector,
            policy: DefaultsPolicy::default(),
            secrets: SecretProvisioner::new(),
            should_stop: Box::new(shutdown_requested),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DefaultsPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: SecretProvisioner) -> Self {
        self.secrets = secrets;
        self
    }

    /// Replace the cancellation check consulted between purge entries.
    #[must_use]
    pub fn with_cancel(mut self, should_stop: impl Fn() -> bool + 'static) -> Self {
        self.should_stop = Box::new(should_stop);
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn state(&self) -> LifecycleState {
        observe(&self.layout)
    }

    fn root_error(&self, err: StoreError) -> CoreError {
        match err {
            StoreError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                CoreError::RootNotWritable {
                    path: self.layout.root().to_path_buf(),
                    reason: e.to_string(),
                }
            }
            other => CoreError::Store(other),
        }
    }

    fn sweep(&self, report: &mut OperationReport) {
        match sweep_trash(&self.layout) {
            Ok(0) => {}
            Ok(n) => report.note(format!("removed {n} leftover(s) of an interrupted hard reset")),
            Err(e) => report.warn(format!("could not sweep hard-reset leftovers: {e}")),
        }
    }

    fn take_backup(
        &self,
        options: &ResetOptions,
        report: &mut OperationReport,
    ) -> Result<Option<BackupArchive>, CoreError> {
        if options.backup == BackupMode::Skip {
            report.note("no backup requested".to_owned());
            return Ok(None);
        }
        match snapshot(&self.layout, &BackupIdentity::now(&options.owner)) {
            Ok(outcome) => {
                for skipped in outcome.warnings() {
                    report.warn(format!(
                        "backup skipped {}: {}",
                        skipped.name, skipped.reason
                    ));
                }
                Ok(Some(outcome.archive))
            }
            Err(e) if options.backup == BackupMode::Required => {
                Err(CoreError::BackupFailed(e.to_string()))
            }
            Err(e) => {
                report.warn(format!("backup failed, continuing without it: {e}"));
                Ok(None)
            }
        }
    }

    /// Install-time configuration with every secret freshly generated, plus a
    /// new master key. Nothing is written.
    fn fresh_config(
        &mut self,
        profile: &PlatformProfile,
        report: &mut OperationReport,
    ) -> Result<(ConfigStore, String), CoreError> {
        let mut store = ConfigStore::new();
        store.push_comment(CONFIG_HEADER);
        seed_install_defaults(&mut store)?;
        self.secrets.rotate_secrets(&mut store)?;
        let master_key = self.secrets.fernet_key()?;
        for note in apply_defaults(&mut store, profile, self.policy)? {
            report.note(note);
        }
        Ok((store, master_key))
    }

    /// Purge what the marker says is left, then persist the fresh
    /// configuration and clear the marker.
    fn finish_reset(
        &self,
        journal: &ResetJournal,
        pending: Option<&ResetMarker>,
        backup: Option<PathBuf>,
        store: &ConfigStore,
        master_key: &str,
        report: &mut OperationReport,
    ) -> Result<(), CoreError> {
        journal.begin(backup)?;
        if pending.map(|m| m.phase) != Some(ResetPhase::Purged) {
            let purge = purge_durable(&self.layout, &*self.should_stop)?;
            report.purge = Some(purge);
            journal.advance(ResetPhase::Purged)?;
        }

        let workspace = ensure(&self.layout).map_err(|e| self.root_error(e))?;
        report.record_workspace(workspace);
        store.save(&self.layout.config_file())?;
        write_secret_file(&self.layout.master_key_file(), master_key)?;
        self.layout.write_install_marker()?;
        journal.complete()?;
        report.note(format!(
            "rotated {} and keys/master.key",
            SECRET_KEYS
                .iter()
                .map(|(k, _)| *k)
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok(())
    }

    /// Complete a soft reset that stopped part way. The reset was confirmed
    /// when it started, so no prompt is shown; the recorded backup is kept.
    fn finish_interrupted_reset(
        &mut self,
        profile: &PlatformProfile,
        report: &mut OperationReport,
    ) -> Result<(), CoreError> {
        let journal = ResetJournal::new(&self.layout);
        let pending = journal.current();
        report.warn(format!(
            "finishing an interrupted soft reset ({}); all secrets are regenerated",
            pending.as_ref().map_or(ResetPhase::Purging, |m| m.phase)
        ));
        let (store, master_key) = self.fresh_config(profile, report)?;
        self.sweep(report);
        let backup = pending.as_ref().and_then(|m| m.backup.clone());
        self.finish_reset(&journal, pending.as_ref(), backup, &store, &master_key, report)?;
        for missing in check_prereqs(profile) {
            report.warn(format!(
                "missing prerequisite {}: needed for {}",
                missing.name, missing.purpose
            ));
        }
        Ok(())
    }

    /// Provision the workspace, or repair an existing one in place.
    ///
    /// Secrets are generated only where missing, so re-running install never
    /// rotates them. An unfinished soft reset is completed instead, which
    /// does rotate them.
    pub fn install(&mut self) -> Result<OperationReport, CoreError> {
        let profile = self.detector.detect();
        info!(
            "installing into {} ({})",
            self.layout.root().display(),
            profile.display_name()
        );
        self.layout.validate()?;
        let from = observe(&self.layout);
        let to = validate_transition(Operation::Install, from)?;
        let mut report = OperationReport::new(Operation::Install, from, profile.clone());

        if matches!(from, LifecycleState::ResetPending | LifecycleState::Reset) {
            self.finish_interrupted_reset(&profile, &mut report)?;
            report.to = to;
            info!("install complete: {to}");
            return Ok(report);
        }

        let config_file = self.layout.config_file();
        let mut store = ConfigStore::load(&config_file)?;
        if store.is_empty() {
            store.push_comment(CONFIG_HEADER);
        }
        let seeded = seed_install_defaults(&mut store)?;
        let added = self.secrets.ensure_secrets(&mut store)?;
        let master_key = if self.layout.master_key_file().is_file() {
            None
        } else {
            Some(self.secrets.fernet_key()?)
        };
        for note in apply_defaults(&mut store, &profile, self.policy)? {
            report.note(note);
        }

        self.sweep(&mut report);
        let workspace = ensure(&self.layout).map_err(|e| self.root_error(e))?;
        report.record_workspace(workspace);

        store.save(&config_file)?;
        if seeded > 0 {
            report.note(format!("added {seeded} default settings"));
        }
        if !added.is_empty() {
            report.note(format!("generated {}", added.join(", ")));
        }
        if let Some(key) = master_key {
            write_secret_file(&self.layout.master_key_file(), &key)?;
            report.note("generated keys/master.key".to_owned());
        }
        self.layout.write_install_marker()?;

        for missing in check_prereqs(&profile) {
            report.warn(format!(
                "missing prerequisite {}: needed for {}",
                missing.name, missing.purpose
            ));
        }

        report.to = to;
        info!("install complete: {to}");
        Ok(report)
    }

    /// Merge the student's identity into the configuration.
    ///
    /// A hardware sensor on a simulation-only host is rejected before anything
    /// is written.
    pub fn personalize(
        &mut self,
        personalization: &Personalization,
    ) -> Result<OperationReport, CoreError> {
        let profile = self.detector.detect();
        info!("personalizing {}", self.layout.root().display());
        let from = observe(&self.layout);
        let to = validate_transition(Operation::Personalize, from)?;

        if let Some(sensor) = personalization.sensor {
            if sensor.requires_hardware() && !profile.supports_hardware_interfaces() {
                return Err(CoreError::IncompatibleSensor {
                    sensor: sensor.to_string(),
                    platform: profile.display_name().to_owned(),
                });
            }
        }
        let name = personalization.student_name.trim();
        if name.is_empty() {
            return Err(SchemaError::InvalidValue {
                key: STUDENT_NAME.to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        let mut report = OperationReport::new(Operation::Personalize, from, profile.clone());
        let config_file = self.layout.config_file();
        let mut store = ConfigStore::load(&config_file)?;
        store.upsert(STUDENT_NAME, name)?;
        store.upsert(EXPERIENCE_LEVEL, personalization.experience_level.as_str())?;
        if let Some(sensor) = personalization.sensor {
            store.upsert(SENSOR_TYPE, sensor.as_str())?;
        }
        let restored = self.secrets.ensure_secrets(&mut store)?;
        if !restored.is_empty() {
            report.warn(format!("restored missing secrets: {}", restored.join(", ")));
        }
        for note in apply_defaults(&mut store, &profile, self.policy)? {
            report.note(note);
        }

        let workspace = ensure(&self.layout).map_err(|e| self.root_error(e))?;
        report.record_workspace(workspace);
        store.save(&config_file)?;

        report.to = to;
        info!("personalized for {name}");
        Ok(report)
    }

    /// Purge durable data, rotate every secret and rewrite the configuration
    /// to install-time defaults, keeping the directory skeleton.
    ///
    /// Re-entrant: an interrupted run leaves a reset marker and the next run
    /// picks up from it.
    pub fn soft_reset(
        &mut self,
        options: &ResetOptions,
        operator: &mut dyn Operator,
    ) -> Result<OperationReport, CoreError> {
        let profile = self.detector.detect();
        self.layout.validate()?;
        let from = observe(&self.layout);
        let to = validate_transition(Operation::SoftReset, from)?;
        let journal = ResetJournal::new(&self.layout);
        let pending = journal.current();

        let root = self.layout.root().display();
        let prompt = match &pending {
            Some(marker) => format!(
                "Resume the unfinished soft reset of {root} (started {})?",
                marker.started_at
            ),
            None => format!(
                "Soft reset {root}: erase logs, data and credentials and rotate all secrets?"
            ),
        };
        if !operator.confirm(&prompt) {
            return Err(CoreError::ConfirmationDeclined("soft reset".to_owned()));
        }
        info!("soft reset of {root} from {from}");
        let mut report = OperationReport::new(Operation::SoftReset, from, profile.clone());

        let (store, master_key) = self.fresh_config(&profile, &mut report)?;

        let backup_path = match &pending {
            Some(marker) if marker.phase == ResetPhase::Purged => {
                report.note("durable data already purged; no new backup taken".to_owned());
                marker.backup.clone()
            }
            Some(ResetMarker {
                backup: Some(previous),
                ..
            }) => {
                report.note(format!(
                    "reusing backup from the interrupted run: {}",
                    previous.display()
                ));
                Some(previous.clone())
            }
            _ => {
                let backup = self.take_backup(options, &mut report)?;
                if let Some(backup) = &backup {
                    operator.notify(&format!("backup written to {}", backup.path.display()));
                }
                report.backup = backup;
                report.backup.as_ref().map(|b| b.path.clone())
            }
        };

        self.finish_reset(&journal, pending.as_ref(), backup_path, &store, &master_key, &mut report)?;

        report.to = to;
        info!("soft reset complete");
        Ok(report)
    }

    /// Delete the whole workspace root after two confirmations, the second
    /// one typed.
    pub fn hard_reset(
        &mut self,
        options: &ResetOptions,
        operator: &mut dyn Operator,
    ) -> Result<OperationReport, CoreError> {
        self.layout.validate()?;
        let profile = self.detector.detect();
        let from = observe(&self.layout);
        let to = validate_transition(Operation::HardReset, from)?;
        let mut report = OperationReport::new(Operation::HardReset, from, profile);

        let root = self.layout.root().to_path_buf();
        if root.symlink_metadata().is_err() {
            report.note(format!("{} does not exist; nothing to remove", root.display()));
            self.sweep(&mut report);
            report.to = to;
            return Ok(report);
        }

        if !operator.confirm(&format!(
            "Hard reset: permanently delete {} and everything in it?",
            root.display()
        )) {
            return Err(CoreError::ConfirmationDeclined("hard reset".to_owned()));
        }
        if !operator.confirm_typed(
            &format!("Type {HARD_RESET_PHRASE} to confirm"),
            HARD_RESET_PHRASE,
        ) {
            return Err(CoreError::ConfirmationDeclined("hard reset".to_owned()));
        }
        info!("hard reset of {} from {from}", root.display());

        let backup = self.take_backup(options, &mut report)?;
        if let Some(backup) = &backup {
            operator.notify(&format!("backup written to {}", backup.path.display()));
        }
        report.backup = backup;

        report.purge = discard_root(&self.layout)?;
        self.sweep(&mut report);

        report.to = to;
        info!("hard reset complete");
        Ok(report)
    }

    /// Remove caches and disposable files. Never changes the lifecycle state.
    pub fn clean(&mut self) -> Result<OperationReport, CoreError> {
        let profile = self.detector.detect();
        let from = observe(&self.layout);
        let to = validate_transition(Operation::Clean, from)?;
        let mut report = OperationReport::new(Operation::Clean, from, profile);
        report.purge = Some(purge_transient(&self.layout, &*self.should_stop)?);
        report.to = to;
        Ok(report)
    }

    pub fn status(&self) -> Result<StatusReport, CoreError> {
        let profile = self.detector.detect();
        let state = observe(&self.layout);
        let store = ConfigStore::load(&self.layout.config_file())?;
        let installed_at = match self.layout.read_install_marker() {
            Ok(marker) => marker.map(|m| m.installed_at),
            Err(e) => {
                warn!("install marker: {e}");
                None
            }
        };
        let missing_secrets = SECRET_KEYS
            .iter()
            .filter(|(key, _)| store.get(key).map_or(true, str::is_empty))
            .map(|(key, _)| (*key).to_owned())
            .collect();
        let permission_issues = if self.layout.root().is_dir() {
            audit_permissions(&self.layout)
        } else {
            Vec::new()
        };

        Ok(StatusReport {
            state,
            profile,
            root: self.layout.root().to_path_buf(),
            backup_root: self.layout.backup_root().to_path_buf(),
            installed_at,
            reset: ResetJournal::new(&self.layout).current(),
            sensor: store.get(SENSOR_TYPE).map(str::to_owned),
            simulation: store.get(SENSOR_SIMULATION).map(str::to_owned),
            student: store.get(STUDENT_NAME).map(str::to_owned),
            missing_secrets,
            permission_issues,
            backups: list_backups(self.layout.backup_root())?.len(),
        })
    }

    /// The configuration as a plain map, for handing to the application
    /// explicitly instead of through the process environment.
    pub fn application_env(&self) -> Result<BTreeMap<String, String>, CoreError> {
        Ok(ConfigStore::load(&self.layout.config_file())?.to_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AcceptAll, ScriptedOperator};
    use labcycle_host::FixedDetector;

    fn lifecycle(profile: PlatformProfile) -> (tempfile::TempDir, Lifecycle) {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().join("ws"), dir.path().join("bk"));
        let lc = Lifecycle::new(layout, Box::new(FixedDetector(profile))).with_cancel(|| false);
        (dir, lc)
    }

    fn options(backup: BackupMode) -> ResetOptions {
        ResetOptions {
            backup,
            owner: "ada".to_owned(),
        }
    }

    #[test]
    fn install_creates_config_and_marker() {
        let (_dir, mut lc) = lifecycle(PlatformProfile::simulation_only("vm"));
        let report = lc.install().unwrap();
        assert_eq!(report.from, LifecycleState::Uninstalled);
        assert_eq!(report.to, LifecycleState::Installed);

        let env = lc.application_env().unwrap();
        assert_eq!(env["SENSOR_SIMULATION"], "true");
        assert_eq!(env["SENSOR_TYPE"], "SIMULATED");
        assert_eq!(env["API_PORT"], "8443");
        for (key, _) in SECRET_KEYS {
            assert!(!env[*key].is_empty());
        }
        assert_eq!(
            std::fs::read_to_string(lc.layout().master_key_file())
                .unwrap()
                .len(),
            44
        );
        assert_eq!(lc.state(), LifecycleState::Installed);
    }

    #[test]
    fn install_on_embedded_uses_policy_sensor() {
        let (_dir, lc) = lifecycle(PlatformProfile::embedded("Raspberry Pi 4 Model B"));
        let mut lc = lc.with_policy(DefaultsPolicy {
            hardware_sensor: labcycle_schema::SensorType::Bme280,
        });
        lc.install().unwrap();
        let env = lc.application_env().unwrap();
        assert_eq!(env["SENSOR_TYPE"], "BME280");
        assert_eq!(env["SENSOR_SIMULATION"], "false");
    }

    #[test]
    fn soft_reset_declined_changes_nothing() {
        let (_dir, mut lc) = lifecycle(PlatformProfile::simulation_only("vm"));
        lc.install().unwrap();
        let before = lc.application_env().unwrap();
        let mut op = ScriptedOperator::new(["no"]);
        let err = lc.soft_reset(&options(BackupMode::Skip), &mut op).unwrap_err();
        assert!(matches!(err, CoreError::ConfirmationDeclined(_)));
        assert_eq!(lc.application_env().unwrap(), before);
    }

    #[test]
    fn soft_reset_resumes_after_purge() {
        let (_dir, mut lc) = lifecycle(PlatformProfile::simulation_only("vm"));
        lc.install().unwrap();
        let journal = ResetJournal::new(lc.layout());
        journal.begin(None).unwrap();
        journal.advance(ResetPhase::Purged).unwrap();
        assert_eq!(lc.state(), LifecycleState::Reset);

        let report = lc
            .soft_reset(&options(BackupMode::BestEffort), &mut AcceptAll)
            .unwrap();
        assert!(report.purge.is_none());
        assert!(report.backup.is_none());
        assert_eq!(lc.state(), LifecycleState::Installed);
    }

    #[test]
    fn clean_keeps_state() {
        let (_dir, mut lc) = lifecycle(PlatformProfile::simulation_only("vm"));
        lc.install().unwrap();
        std::fs::write(lc.layout().root().join("scratch.tmp"), "x").unwrap();
        let report = lc.clean().unwrap();
        assert_eq!(report.from, report.to);
        assert_eq!(report.purge.unwrap().files_removed, 1);
    }

    #[test]
    fn status_reports_findings() {
        let (_dir, mut lc) = lifecycle(PlatformProfile::simulation_only("vm"));
        lc.install().unwrap();
        assert!(lc.status().unwrap().findings().is_empty());

        let mut store = ConfigStore::load(&lc.layout().config_file()).unwrap();
        store.remove("JWT_SECRET");
        store.upsert(SENSOR_SIMULATION, "false").unwrap();
        store.save(&lc.layout().config_file()).unwrap();

        let status = lc.status().unwrap();
        assert_eq!(status.missing_secrets, ["JWT_SECRET"]);
        assert_eq!(status.findings().len(), 2);
    }
}
