//! Command handlers.
//!
//! Each handler loads configuration, does its work through the library
//! modules, prints to stdout, and returns the process exit code.
use crate::cli::{
    ApplyArgs, Command, EnvFileArgs, ListArgs, PlanArgs, RootArgs, ValidateArgs, VerifyArgs,
};
use crate::config::{validate_entry, ConfigSource, EnvironmentConfig};
use crate::credentials;
use crate::envfile::render_env_file;
use crate::platform::psql::PsqlRunner;
use crate::platform::rest::WorkspaceSession;
use crate::platform::DatabricksPlatform;
use crate::provision::Provisioner;
use crate::report;
use crate::resource::{plan_for_step, Step};
use crate::util::{write_atomic, write_json};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

pub fn run(args: RootArgs) -> Result<u8> {
    let config_path = args.config.as_deref();
    match args.command {
        Command::List(list) => run_list(config_path, &list),
        Command::Validate(validate) => run_validate(config_path, &validate),
        Command::Plan(plan) => run_plan(config_path, &plan),
        Command::Apply(apply) => run_apply(config_path, &apply),
        Command::Verify(verify) => run_verify(config_path, &verify),
        Command::EnvFile(env_file) => run_env_file(config_path, &env_file),
    }
}

fn load_source(config_path: Option<&Path>) -> Result<ConfigSource> {
    let source = ConfigSource::locate_and_load(config_path).context("load environments")?;
    tracing::debug!(path = %source.path().display(), "loaded environments");
    Ok(source)
}

fn load_environment(config_path: Option<&Path>, name: &str) -> Result<EnvironmentConfig> {
    let source = load_source(config_path)?;
    let config = source.load_environment(name)?;
    tracing::debug!(environment = %config.name, base_name = %config.base_name, "environment loaded");
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the production platform for one command.
fn connect(config: &EnvironmentConfig) -> Result<DatabricksPlatform> {
    let access = credentials::resolve(config)?;
    let sql = PsqlRunner::new(
        &config.name,
        config.psql_command.as_deref(),
        config.profile.clone(),
        access.host.clone(),
        access.credential.clone(),
    )?;
    tracing::debug!(host = %access.host, profile = ?config.profile, "workspace session");
    let rest = WorkspaceSession::new(
        access,
        Duration::from_millis(config.retry.request_timeout_ms),
    );
    Ok(DatabricksPlatform::new(rest, sql))
}

#[derive(Serialize)]
struct ListedEnvironment {
    name: String,
    base_name: String,
    workspace_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<String>,
}

fn run_list(config_path: Option<&Path>, args: &ListArgs) -> Result<u8> {
    let source = load_source(config_path)?;
    let listed: Vec<ListedEnvironment> = source
        .entries()
        .map(|(name, entry)| ListedEnvironment {
            name: name.clone(),
            base_name: entry.base_name.clone(),
            workspace_url: entry.resolved_workspace_url(),
            profile: entry.resolved_profile(),
        })
        .collect();
    if args.json {
        print_json(&listed)?;
    } else {
        println!("environments in {}:", source.path().display());
        for env in &listed {
            let host = if env.workspace_url.is_empty() {
                "<profile host>"
            } else {
                env.workspace_url.as_str()
            };
            println!("  {:<16} {:<20} {host}", env.name, env.base_name);
        }
    }
    Ok(report::EXIT_OK)
}

fn run_validate(config_path: Option<&Path>, args: &ValidateArgs) -> Result<u8> {
    let source = load_source(config_path)?;
    let names = match &args.environment {
        Some(name) => {
            source.entry(name)?;
            vec![name.clone()]
        }
        None => source.names(),
    };
    let cli_missing = which::which("databricks").is_err();
    let mut reports = Vec::with_capacity(names.len());
    for name in &names {
        let mut validation = validate_entry(name, source.entry(name)?);
        if cli_missing {
            validation.warnings.push(
                "databricks CLI not found on PATH; db_schema and db_table_set cannot be provisioned"
                    .to_string(),
            );
        }
        reports.push(validation);
    }
    if args.json {
        print_json(&reports)?;
    } else {
        print!("{}", report::render_validation(&reports));
    }
    Ok(if reports.iter().all(|r| r.is_valid()) {
        report::EXIT_OK
    } else {
        report::EXIT_CONFIG
    })
}

fn run_plan(config_path: Option<&Path>, args: &PlanArgs) -> Result<u8> {
    let config = load_environment(config_path, &args.env.environment)?;
    let plan = plan_for_step(&config, args.step);
    if args.json {
        print_json(&plan)?;
    } else {
        print!("{}", report::render_plan(&config, &plan));
    }
    Ok(report::EXIT_OK)
}

fn run_apply(config_path: Option<&Path>, args: &ApplyArgs) -> Result<u8> {
    let config = load_environment(config_path, &args.env.environment)?;
    let platform = connect(&config)?;
    let provisioner = Provisioner::for_environment(&platform, &config)
        .exclude(args.skip.iter().copied())
        .dry_run(args.dry_run);
    let run = match args.step {
        Step::All => provisioner.run_all(&config),
        step => provisioner.run_step(&config, step),
    };
    if let Some(out) = &args.out {
        write_json(out, &run).with_context(|| format!("write report {}", out.display()))?;
        tracing::info!(path = %out.display(), "report written");
    }
    if args.json {
        print_json(&run)?;
    } else {
        print!("{}", report::render_run(&run));
    }
    Ok(report::run_exit_code(&run))
}

fn run_verify(config_path: Option<&Path>, args: &VerifyArgs) -> Result<u8> {
    let config = load_environment(config_path, &args.env.environment)?;
    let platform = connect(&config)?;
    let verification = Provisioner::for_environment(&platform, &config).verify(&config);
    if let Some(out) = &args.out {
        write_json(out, &verification)
            .with_context(|| format!("write report {}", out.display()))?;
    }
    if args.json {
        print_json(&verification)?;
    } else {
        print!("{}", report::render_verify(&verification));
    }
    Ok(report::verify_exit_code(&verification))
}

fn run_env_file(config_path: Option<&Path>, args: &EnvFileArgs) -> Result<u8> {
    let config = load_environment(config_path, &args.env.environment)?;
    let rendered = render_env_file(&config);
    match &args.out {
        Some(out) => {
            if out.exists() && !args.force {
                return Err(anyhow!(
                    "{} already exists (use --force to replace it)",
                    out.display()
                ));
            }
            write_atomic(out, rendered.as_bytes())?;
            println!("wrote {}", out.display());
        }
        None => print!("{rendered}"),
    }
    Ok(report::EXIT_OK)
}
