//! Convergence of an environment onto its declared resources.
//!
//! The provisioner walks the plan in order, checking each resource, creating
//! it when absent, and recording one terminal state per resource. It never
//! deletes and never prints; rendering lives in the CLI layer.
pub mod retry;

#[cfg(test)]
pub(crate) mod fake;

use crate::config::{EnvironmentConfig, RetrySettings};
use crate::platform::{ErrorClass, Platform, PlatformError};
use crate::resource::{plan_for_step, plan_resources, ResourceKind, ResourceSpec, Step};
use retry::{ReadinessPolicy, RetryPolicy};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Existed,
    Created,
    Failed,
    Skipped,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Existed => "existed",
            ResourceStatus::Created => "created",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// A hard dependency failed, was blocked, or is absent.
    BlockedByDependency,
    /// Listed in the operator's skip list.
    Excluded,
    /// Absent, but the run only reports what it would create.
    DryRun,
    /// The platform became unreachable earlier in the run.
    Aborted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::BlockedByDependency => "blocked-by-dependency",
            SkipReason::Excluded => "excluded",
            SkipReason::DryRun => "dry-run",
            SkipReason::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome for one planned resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceState {
    #[serde(flatten)]
    pub spec: ResourceSpec,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResourceState {
    fn new(spec: &ResourceSpec, status: ResourceStatus) -> Self {
        Self {
            spec: spec.clone(),
            status,
            identifier: None,
            skip_reason: None,
            error_class: None,
            message: None,
        }
    }

    pub fn existed(spec: &ResourceSpec, identifier: Option<String>) -> Self {
        Self {
            identifier,
            ..Self::new(spec, ResourceStatus::Existed)
        }
    }

    pub fn created(spec: &ResourceSpec, identifier: String) -> Self {
        Self {
            identifier: Some(identifier),
            ..Self::new(spec, ResourceStatus::Created)
        }
    }

    pub fn failed(spec: &ResourceSpec, err: &PlatformError) -> Self {
        Self {
            error_class: Some(err.class()),
            message: Some(err.to_string()),
            ..Self::new(spec, ResourceStatus::Failed)
        }
    }

    pub fn skipped(spec: &ResourceSpec, reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason),
            message: Some(message.into()),
            ..Self::new(spec, ResourceStatus::Skipped)
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this state stops resources that depend on it.
    fn blocks_dependents(&self) -> bool {
        match self.status {
            ResourceStatus::Failed => true,
            ResourceStatus::Skipped => matches!(
                self.skip_reason,
                Some(SkipReason::BlockedByDependency | SkipReason::Aborted)
            ),
            ResourceStatus::Existed | ResourceStatus::Created => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub created: usize,
    pub existed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn from_states(states: &[ResourceState]) -> Self {
        let mut counts = StatusCounts::default();
        for state in states {
            match state.status {
                ResourceStatus::Created => counts.created += 1,
                ResourceStatus::Existed => counts.existed += 1,
                ResourceStatus::Failed => counts.failed += 1,
                ResourceStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Result of one apply run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub environment: String,
    pub base_name: String,
    pub step: &'static str,
    pub dry_run: bool,
    pub aborted: bool,
    pub counts: StatusCounts,
    pub states: Vec<ResourceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyReport>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ResourceState> {
        self.states
            .iter()
            .filter(|state| state.status == ResourceStatus::Failed)
    }

    #[cfg(test)]
    pub fn state(&self, kind: ResourceKind) -> Option<&ResourceState> {
        self.states.iter().find(|state| state.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
    /// The existence check itself failed.
    Unknown,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Present => "present",
            Presence::Absent => "absent",
            Presence::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyEntry {
    #[serde(flatten)]
    pub spec: ResourceSpec,
    pub presence: Presence,
    /// Listed in the skip list; does not count against health.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub excluded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PresenceCounts {
    pub present: usize,
    pub absent: usize,
    pub unknown: usize,
}

/// Result of a verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub environment: String,
    pub base_name: String,
    pub unreachable: bool,
    pub counts: PresenceCounts,
    pub entries: Vec<VerifyEntry>,
}

impl VerifyReport {
    /// Every non-excluded resource is present.
    pub fn is_healthy(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.excluded || entry.presence == Presence::Present)
    }

    #[cfg(test)]
    pub fn entry(&self, kind: ResourceKind) -> Option<&VerifyEntry> {
        self.entries.iter().find(|entry| entry.spec.kind == kind)
    }
}

/// Drives one environment's plan against a platform.
pub struct Provisioner<'a> {
    platform: &'a dyn Platform,
    retry: RetryPolicy,
    readiness: ReadinessPolicy,
    startup: ReadinessPolicy,
    dry_run: bool,
    excluded: BTreeSet<ResourceKind>,
}

impl<'a> Provisioner<'a> {
    pub fn new(platform: &'a dyn Platform, settings: &RetrySettings) -> Self {
        Self {
            platform,
            retry: RetryPolicy::from(settings),
            readiness: ReadinessPolicy::from(settings),
            startup: ReadinessPolicy::startup(settings),
            dry_run: false,
            excluded: BTreeSet::new(),
        }
    }

    /// Provisioner with the environment's retry settings and skip list.
    pub fn for_environment(platform: &'a dyn Platform, config: &EnvironmentConfig) -> Self {
        Self::new(platform, &config.retry).exclude(config.skip.iter().copied())
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn exclude(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.excluded.extend(kinds);
        self
    }

    fn exists(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        self.retry
            .run(&format!("exists {}", spec.kind), || self.platform.exists(spec))
    }

    fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        self.retry
            .run(&format!("exists {}", spec.kind), || self.platform.find(spec))
    }

    fn ready(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        self.retry
            .run(&format!("ready {}", spec.kind), || self.platform.ready(spec))
    }

    fn readiness_for(&self, kind: ResourceKind) -> &ReadinessPolicy {
        if kind.starts_asynchronously() {
            &self.startup
        } else {
            &self.readiness
        }
    }

    /// Check one resource, create it if absent, and wait until it is ready.
    pub fn converge(&self, spec: &ResourceSpec) -> ResourceState {
        match self.find(spec) {
            Ok(Some(identifier)) => {
                tracing::info!(kind = %spec.kind, name = %spec.name, identifier = %identifier, "exists");
                return ResourceState::existed(spec, Some(identifier));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(kind = %spec.kind, name = %spec.name, error = %err, "existence check failed");
                return ResourceState::failed(spec, &err);
            }
        }
        if self.dry_run {
            tracing::info!(kind = %spec.kind, name = %spec.name, "would create");
            return ResourceState::skipped(spec, SkipReason::DryRun, "absent; would create");
        }

        let identifier = match self
            .retry
            .run(&format!("create {}", spec.kind), || self.platform.create(spec))
        {
            Ok(identifier) => identifier,
            Err(PlatformError::Conflict(message)) => {
                tracing::info!(kind = %spec.kind, name = %spec.name, "created concurrently");
                return ResourceState::existed(spec, None)
                    .with_message(format!("created concurrently ({message})"));
            }
            Err(err) => {
                tracing::warn!(kind = %spec.kind, name = %spec.name, error = %err, "create failed");
                return ResourceState::failed(spec, &err);
            }
        };

        let readiness = self.readiness_for(spec.kind);
        match readiness.wait(|| self.ready(spec)) {
            Ok(true) => {
                tracing::info!(kind = %spec.kind, name = %spec.name, identifier = %identifier, "created");
                ResourceState::created(spec, identifier)
            }
            Ok(false) => {
                let err = PlatformError::Unknown(format!(
                    "created but not ready after {} checks",
                    readiness.checks.max(1)
                ));
                tracing::warn!(kind = %spec.kind, name = %spec.name, error = %err, "verify after create failed");
                ResourceState::failed(spec, &err)
            }
            Err(err) => {
                tracing::warn!(kind = %spec.kind, name = %spec.name, error = %err, "verify after create failed");
                ResourceState::failed(spec, &err)
            }
        }
    }

    /// Converge the full plan, then verify it.
    pub fn run_all(&self, config: &EnvironmentConfig) -> RunReport {
        self.run_step(config, Step::All)
    }

    /// Converge the part of the plan selected by `step`.
    pub fn run_step(&self, config: &EnvironmentConfig, step: Step) -> RunReport {
        if step == Step::Verify {
            let verification = self.verify(config);
            return RunReport {
                environment: config.name.clone(),
                base_name: config.base_name.clone(),
                step: step.as_str(),
                dry_run: self.dry_run,
                aborted: verification.unreachable,
                counts: StatusCounts::default(),
                states: Vec::new(),
                verification: Some(verification),
            };
        }

        let plan = plan_for_step(config, step);
        tracing::info!(
            environment = %config.name,
            base_name = %config.base_name,
            step = %step,
            resources = plan.len(),
            dry_run = self.dry_run,
            "apply"
        );
        let mut states: Vec<ResourceState> = Vec::with_capacity(plan.len());
        let mut aborted = false;
        for spec in &plan {
            let state = if aborted {
                ResourceState::skipped(spec, SkipReason::Aborted, "platform unreachable")
            } else if self.excluded.contains(&spec.kind) {
                ResourceState::skipped(spec, SkipReason::Excluded, "in skip list")
            } else if let Some(message) = pending_dry_run(spec.kind, &states) {
                ResourceState::skipped(spec, SkipReason::DryRun, message)
            } else if let Some(reason) = self.blocking_reason(config, spec.kind, &states) {
                tracing::warn!(kind = %spec.kind, name = %spec.name, reason = %reason, "blocked");
                ResourceState::skipped(spec, SkipReason::BlockedByDependency, reason)
            } else {
                self.converge(spec)
            };
            if state.error_class == Some(ErrorClass::Unavailable) {
                tracing::error!(kind = %spec.kind, "platform unreachable; aborting run");
                aborted = true;
            }
            states.push(state);
        }

        let verification = (!self.dry_run && !aborted).then(|| self.verify_plan(config, &plan));
        let counts = StatusCounts::from_states(&states);
        tracing::info!(
            created = counts.created,
            existed = counts.existed,
            failed = counts.failed,
            skipped = counts.skipped,
            "apply finished"
        );
        RunReport {
            environment: config.name.clone(),
            base_name: config.base_name.clone(),
            step: step.as_str(),
            dry_run: self.dry_run,
            aborted,
            counts,
            states,
            verification,
        }
    }

    /// Why `kind` cannot be converged now, if its hard dependency is not usable.
    fn blocking_reason(
        &self,
        config: &EnvironmentConfig,
        kind: ResourceKind,
        states: &[ResourceState],
    ) -> Option<String> {
        let dependency = kind.hard_dependency()?;
        match states.iter().find(|state| state.kind() == dependency) {
            Some(state) if state.blocks_dependents() => {
                let why = state
                    .skip_reason
                    .map(|reason| reason.to_string())
                    .unwrap_or_else(|| state.status.to_string());
                Some(format!("{dependency} {}: {why}", state.spec.name))
            }
            Some(state) if state.skip_reason == Some(SkipReason::Excluded) => {
                self.probe_dependency(config, dependency)
            }
            Some(_) => None,
            None => self.probe_dependency(config, dependency),
        }
    }

    /// Read-only check of a dependency this run does not converge.
    fn probe_dependency(&self, config: &EnvironmentConfig, dependency: ResourceKind) -> Option<String> {
        let spec = ResourceSpec::for_kind(config, dependency);
        match self.exists(&spec) {
            Ok(true) => None,
            Ok(false) => Some(format!("{dependency} {} is absent", spec.name)),
            Err(err) => Some(format!("{dependency} {} could not be checked: {err}", spec.name)),
        }
    }

    /// Existence checks for the full plan; never creates.
    pub fn verify(&self, config: &EnvironmentConfig) -> VerifyReport {
        self.verify_plan(config, &plan_resources(config))
    }

    fn verify_plan(&self, config: &EnvironmentConfig, plan: &[ResourceSpec]) -> VerifyReport {
        let mut seen: BTreeMap<ResourceKind, Presence> = BTreeMap::new();
        let mut entries = Vec::with_capacity(plan.len());
        let mut unreachable = false;
        for spec in plan {
            let dependency_absent = spec
                .kind
                .hard_dependency()
                .and_then(|dependency| seen.get(&dependency).map(|presence| (dependency, *presence)))
                .filter(|(_, presence)| *presence == Presence::Absent);
            let (presence, message) = if unreachable {
                (Presence::Unknown, Some("platform unreachable".to_string()))
            } else if let Some((dependency, _)) = dependency_absent {
                (Presence::Absent, Some(format!("{dependency} is absent")))
            } else {
                match self.exists(spec) {
                    Ok(true) => (Presence::Present, None),
                    Ok(false) => (Presence::Absent, None),
                    Err(err) => {
                        unreachable = err.class() == ErrorClass::Unavailable;
                        (Presence::Unknown, Some(err.to_string()))
                    }
                }
            };
            tracing::debug!(kind = %spec.kind, name = %spec.name, presence = %presence, "verify");
            seen.insert(spec.kind, presence);
            entries.push(VerifyEntry {
                spec: spec.clone(),
                presence,
                excluded: self.excluded.contains(&spec.kind),
                message,
            });
        }
        let mut counts = PresenceCounts::default();
        for entry in &entries {
            match entry.presence {
                Presence::Present => counts.present += 1,
                Presence::Absent => counts.absent += 1,
                Presence::Unknown => counts.unknown += 1,
            }
        }
        VerifyReport {
            environment: config.name.clone(),
            base_name: config.base_name.clone(),
            unreachable,
            counts,
            entries,
        }
    }
}

/// In a dry run, dependents of a would-be-created resource are not checked.
fn pending_dry_run(kind: ResourceKind, states: &[ResourceState]) -> Option<String> {
    let dependency = kind.hard_dependency()?;
    states
        .iter()
        .find(|state| state.kind() == dependency && state.skip_reason == Some(SkipReason::DryRun))
        .map(|state| format!("{dependency} {} would be created first", state.spec.name))
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
