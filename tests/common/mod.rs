//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const TWO_ENVIRONMENTS: &str = r#"{
  "development": {
    "base_name": "demo",
    "workspace_url": "http://127.0.0.1:1",
    "token_env": "ENVPROV_TEST_TOKEN",
    "retry": { "max_attempts": 1, "ready_checks": 1, "request_timeout_ms": 2000 }
  },
  "production": {
    "base_name": "acme",
    "databricks_host": "https://prod.example.cloud.databricks.com",
    "databricks_profile": "prod",
    "skip": ["vector_index"]
  }
}"#;

/// A scratch directory holding an `environments.json`.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("environments.json"), config).expect("write config");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Run the binary from the workspace with a scrubbed credential environment.
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run envprov")
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_envprov"));
        command
            .args(args)
            .current_dir(self.path())
            .env_remove("ENVPROV_CONFIG")
            .env_remove("DATABRICKS_TOKEN")
            .env_remove("ENVPROV_TEST_TOKEN")
            .env_remove("RUST_LOG")
            .env_remove("HTTP_PROXY")
            .env_remove("HTTPS_PROXY")
            .env_remove("ALL_PROXY")
            .env_remove("http_proxy")
            .env_remove("https_proxy")
            .env_remove("all_proxy")
            .env("DATABRICKS_CONFIG_FILE", self.file("missing.databrickscfg"))
            .env("HOME", self.path());
        command
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
