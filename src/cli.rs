//! CLI argument parsing for the provisioning workflow.
use crate::resource::{ResourceKind, Step};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "envprov",
    version,
    about = "Idempotent environment provisioner for lakehouse workspaces",
    after_help = "Exit codes:\n  0  nothing failed\n  1  at least one resource failed\n  2  configuration error\n  3  platform unreachable\n\nExamples:\n  envprov list\n  envprov plan -e development\n  envprov apply -e development --dry-run\n  envprov apply -e production --step tables --json --out report.json\n  envprov verify -e development",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Environment mapping file (default: $ENVPROV_CONFIG, ./environments.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    List(ListArgs),
    Validate(ValidateArgs),
    Plan(PlanArgs),
    Apply(ApplyArgs),
    Verify(VerifyArgs),
    EnvFile(EnvFileArgs),
}

/// Environment selection shared by most commands.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArg {
    /// Environment name (a key of the mapping file)
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,
}

#[derive(Parser, Debug)]
#[command(about = "List configured environments")]
pub struct ListArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Check environment entries without contacting the platform")]
pub struct ValidateArgs {
    /// Validate only this environment (default: all)
    #[arg(short, long, value_name = "NAME")]
    pub environment: Option<String>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Print the ordered resource plan with derived names")]
pub struct PlanArgs {
    #[command(flatten)]
    pub env: EnvironmentArg,

    /// Restrict the plan to one step
    #[arg(long, value_enum, default_value_t = Step::All)]
    pub step: Step,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Create missing resources, then verify")]
pub struct ApplyArgs {
    #[command(flatten)]
    pub env: EnvironmentArg,

    /// Which part of the plan to converge
    #[arg(long, value_enum, default_value_t = Step::All)]
    pub step: Step,

    /// Check existence and report what would be created
    #[arg(long)]
    pub dry_run: bool,

    /// Resource kinds to leave untouched (adds to the configured skip list)
    #[arg(long, value_enum, value_delimiter = ',', value_name = "KIND")]
    pub skip: Vec<ResourceKind>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Also write the JSON report to this path
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Check that every resource exists; never creates")]
pub struct VerifyArgs {
    #[command(flatten)]
    pub env: EnvironmentArg,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Also write the JSON report to this path
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Render a .env file for the app from derived names")]
pub struct EnvFileArgs {
    #[command(flatten)]
    pub env: EnvironmentArg,

    /// Output path (default: stdout)
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Replace an existing output file
    #[arg(long)]
    pub force: bool,
}
