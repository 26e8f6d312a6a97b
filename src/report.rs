//! Human-readable rendering and exit codes.
use crate::config::{ConfigError, EnvironmentConfig, ValidationReport};
use crate::platform::{ErrorClass, PlatformError};
use crate::provision::{Presence, ResourceState, ResourceStatus, RunReport, VerifyReport};
use crate::resource::ResourceSpec;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_UNREACHABLE: u8 = 3;

pub fn run_exit_code(report: &RunReport) -> u8 {
    if report.aborted {
        return EXIT_UNREACHABLE;
    }
    if report.counts.failed > 0 {
        return EXIT_FAILED;
    }
    match (&report.verification, report.states.is_empty()) {
        (Some(verification), true) => verify_exit_code(verification),
        _ => EXIT_OK,
    }
}

pub fn verify_exit_code(report: &VerifyReport) -> u8 {
    if report.unreachable {
        EXIT_UNREACHABLE
    } else if report.is_healthy() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

/// Exit code for an error that ended a command early.
pub fn exit_code_for_error(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
        if let Some(platform) = cause.downcast_ref::<PlatformError>() {
            if platform.class() == ErrorClass::Unavailable {
                return EXIT_UNREACHABLE;
            }
        }
    }
    EXIT_FAILED
}

/// Render an error with its causes, outermost first.
pub fn error_chain_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

fn header(out: &mut String, environment: &str, base_name: &str) {
    out.push_str(&format!(
        "environment {environment} (base name {base_name})\n"
    ));
}

pub fn render_plan(config: &EnvironmentConfig, plan: &[ResourceSpec]) -> String {
    let mut out = String::new();
    header(&mut out, &config.name, &config.base_name);
    for spec in plan {
        out.push_str(&format!(
            "  {} {:<13} {}",
            spec.kind.stage(),
            spec.kind.as_str(),
            spec.qualified_name()
        ));
        if let Some(dependency) = spec.kind.hard_dependency() {
            out.push_str(&format!("  (needs {dependency})"));
        }
        if config.skip.contains(&spec.kind) {
            out.push_str("  [skipped by config]");
        }
        out.push('\n');
    }
    out
}

fn state_line(state: &ResourceState) -> String {
    let mut line = format!(
        "  {:<8} {:<13} {}",
        state.status.as_str(),
        state.spec.kind.as_str(),
        state.spec.qualified_name()
    );
    match state.status {
        ResourceStatus::Created | ResourceStatus::Existed => {
            if let Some(identifier) = &state.identifier {
                line.push_str(&format!("  [{identifier}]"));
            }
            if let Some(message) = &state.message {
                line.push_str(&format!("  {message}"));
            }
        }
        ResourceStatus::Skipped => {
            let reason = state.skip_reason.map(|reason| reason.as_str()).unwrap_or("skipped");
            match &state.message {
                Some(message) => line.push_str(&format!("  ({reason}: {message})")),
                None => line.push_str(&format!("  ({reason})")),
            }
        }
        ResourceStatus::Failed => {
            if let Some(message) = &state.message {
                line.push_str(&format!("  {message}"));
            }
        }
    }
    line
}

pub fn render_run(report: &RunReport) -> String {
    let mut out = String::new();
    header(&mut out, &report.environment, &report.base_name);
    out.push_str(&format!(
        "step {}{}\n",
        report.step,
        if report.dry_run { " (dry run)" } else { "" }
    ));
    for state in &report.states {
        out.push_str(&state_line(state));
        out.push('\n');
    }
    if !report.states.is_empty() {
        let counts = &report.counts;
        out.push_str(&format!(
            "summary: {} created, {} existed, {} failed, {} skipped\n",
            counts.created, counts.existed, counts.failed, counts.skipped
        ));
    }
    let failures: Vec<&ResourceState> = report.failures().collect();
    if !failures.is_empty() {
        out.push_str("failures:\n");
        for state in failures {
            out.push_str(&format!(
                "  {} {}: {}\n",
                state.spec.kind,
                state.spec.name,
                state.message.as_deref().unwrap_or("failed")
            ));
        }
    }
    if report.aborted {
        out.push_str("aborted: platform unreachable\n");
    }
    if let Some(verification) = &report.verification {
        out.push_str(&render_verify_body(verification));
    }
    out
}

fn render_verify_body(report: &VerifyReport) -> String {
    let mut out = String::new();
    let counts = &report.counts;
    out.push_str(&format!(
        "verification: {} present, {} absent, {} unknown\n",
        counts.present, counts.absent, counts.unknown
    ));
    for entry in &report.entries {
        if entry.presence == Presence::Present {
            continue;
        }
        out.push_str(&format!(
            "  {:<8} {:<13} {}",
            entry.presence.as_str(),
            entry.spec.kind.as_str(),
            entry.spec.qualified_name()
        ));
        if entry.excluded {
            out.push_str("  [skipped by config]");
        }
        if let Some(message) = &entry.message {
            out.push_str(&format!("  {message}"));
        }
        out.push('\n');
    }
    out
}

pub fn render_verify(report: &VerifyReport) -> String {
    let mut out = String::new();
    header(&mut out, &report.environment, &report.base_name);
    for entry in &report.entries {
        out.push_str(&format!(
            "  {:<8} {:<13} {}\n",
            entry.presence.as_str(),
            entry.spec.kind.as_str(),
            entry.spec.qualified_name()
        ));
    }
    out.push_str(&render_verify_body(report));
    out.push_str(if report.is_healthy() {
        "healthy\n"
    } else {
        "not healthy\n"
    });
    out
}

pub fn render_validation(reports: &[ValidationReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let verdict = if report.is_valid() { "ok" } else { "invalid" };
        out.push_str(&format!("{}: {verdict}\n", report.environment));
        for error in &report.errors {
            out.push_str(&format!("  error: {error}\n"));
        }
        for warning in &report.warnings {
            out.push_str(&format!("  warning: {warning}\n"));
        }
    }
    out
}
