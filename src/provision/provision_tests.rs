use super::fake::{FakePlatform, Op};
use super::*;
use crate::config::test_environment;
use crate::report::{run_exit_code, EXIT_OK};

fn fast_config() -> EnvironmentConfig {
    let mut config = test_environment("development", "demo");
    config.retry.initial_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config.retry.ready_interval_ms = 0;
    config.retry.startup_interval_ms = 0;
    config
}

fn status_of(report: &RunReport, kind: ResourceKind) -> (ResourceStatus, Option<SkipReason>) {
    let state = report.state(kind).expect("kind in report");
    (state.status, state.skip_reason)
}

#[test]
fn fresh_workspace_converges_everything() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);

    assert_eq!(report.states.len(), 9);
    assert_eq!(report.counts.created, 9);
    assert_eq!(report.counts.failed, 0);
    assert!(!report.aborted);
    assert_eq!(platform.creates(), ResourceKind::ALL.to_vec());
    let app = report.state(ResourceKind::App).expect("app state");
    assert_eq!(app.spec.name, "demo-app");
    assert_eq!(app.identifier.as_deref(), Some("id-demo-app"));
    let verification = report.verification.expect("verification pass");
    assert!(verification.is_healthy());
    assert_eq!(verification.counts.present, 9);
}

#[test]
fn second_run_creates_nothing() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let provisioner = Provisioner::for_environment(&platform, &config);
    provisioner.run_all(&config);
    let creates_after_first = platform.creates().len();

    let report = provisioner.run_all(&config);
    assert_eq!(platform.creates().len(), creates_after_first);
    assert_eq!(report.counts.existed, 9);
    assert!(report
        .states
        .iter()
        .all(|state| state.status == ResourceStatus::Existed));
    assert_eq!(run_exit_code(&report), EXIT_OK);
}

#[test]
fn existing_resources_keep_their_identifiers() {
    let config = fast_config();
    let platform = FakePlatform::with_existing(ResourceKind::ALL);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    let instance = report.state(ResourceKind::DbInstance).expect("instance");
    assert_eq!(instance.status, ResourceStatus::Existed);
    assert_eq!(instance.identifier.as_deref(), Some("id-demo-pg-db"));

    let value = serde_json::to_value(&report).expect("serialize");
    let warehouse = &value["states"][3];
    assert_eq!(warehouse["kind"], "warehouse");
    assert_eq!(warehouse["status"], "existed");
    assert_eq!(warehouse["identifier"], "id-demo-wh");
}

#[test]
fn existing_resources_are_left_alone() {
    let config = fast_config();
    let platform = FakePlatform::with_existing([ResourceKind::Catalog, ResourceKind::Warehouse]);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::Catalog).0, ResourceStatus::Existed);
    assert_eq!(status_of(&report, ResourceKind::Warehouse).0, ResourceStatus::Existed);
    assert_eq!(report.counts.created, 7);
    assert_eq!(platform.count(Op::Create, ResourceKind::Catalog), 0);
    assert_eq!(platform.count(Op::Create, ResourceKind::Warehouse), 0);
}

#[test]
fn failed_catalog_blocks_schema_and_volume_without_calls() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Create,
        ResourceKind::Catalog,
        PlatformError::Invalid("HTTP 400: bad comment".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);

    let catalog = report.state(ResourceKind::Catalog).expect("catalog");
    assert_eq!(catalog.status, ResourceStatus::Failed);
    assert_eq!(catalog.error_class, Some(ErrorClass::Invalid));
    assert!(catalog
        .message
        .as_deref()
        .is_some_and(|message| message.contains("bad comment")));
    for kind in [ResourceKind::Schema, ResourceKind::Volume] {
        assert_eq!(
            status_of(&report, kind),
            (ResourceStatus::Skipped, Some(SkipReason::BlockedByDependency))
        );
        assert_eq!(platform.count(Op::Exists, kind), 0, "{kind} was probed");
        assert_eq!(platform.count(Op::Create, kind), 0, "{kind} was created");
    }
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.skipped, 2);
    assert_eq!(report.counts.created, 6);
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn failed_instance_blocks_database_objects_but_not_app() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Create,
        ResourceKind::DbInstance,
        PlatformError::Unauthorized("HTTP 403: denied".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::DbInstance).0, ResourceStatus::Failed);
    assert_eq!(
        status_of(&report, ResourceKind::DbSchema),
        (ResourceStatus::Skipped, Some(SkipReason::BlockedByDependency))
    );
    assert_eq!(
        status_of(&report, ResourceKind::DbTableSet),
        (ResourceStatus::Skipped, Some(SkipReason::BlockedByDependency))
    );
    assert_eq!(status_of(&report, ResourceKind::App).0, ResourceStatus::Created);
    assert_eq!(platform.count(Op::Create, ResourceKind::DbInstance), 1);
}

#[test]
fn concurrent_create_counts_as_existed() {
    let config = fast_config();
    let platform = FakePlatform::new().race_on_create(ResourceKind::Warehouse);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    let warehouse = report.state(ResourceKind::Warehouse).expect("warehouse");
    assert_eq!(warehouse.status, ResourceStatus::Existed);
    assert!(warehouse
        .message
        .as_deref()
        .is_some_and(|message| message.contains("concurrently")));
    assert_eq!(report.counts.failed, 0);
}

#[test]
fn transient_create_failures_are_bounded() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Create,
        ResourceKind::App,
        PlatformError::Transient("HTTP 503: unavailable".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(
        platform.count(Op::Create, ResourceKind::App),
        config.retry.max_attempts as usize
    );
    let app = report.state(ResourceKind::App).expect("app");
    assert_eq!(app.status, ResourceStatus::Failed);
    assert_eq!(app.error_class, Some(ErrorClass::Transient));
}

#[test]
fn transient_check_failures_recover() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_times(
        Op::Exists,
        ResourceKind::Catalog,
        2,
        PlatformError::Transient("timeout".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::Catalog).0, ResourceStatus::Created);
    assert_eq!(report.counts.failed, 0);
}

#[test]
fn unauthorized_is_not_retried() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Exists,
        ResourceKind::VectorIndex,
        PlatformError::Unauthorized("HTTP 401".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::VectorIndex).0, ResourceStatus::Failed);
    assert_eq!(platform.count(Op::Create, ResourceKind::VectorIndex), 0);
    // One check during the run, one during the verification pass.
    assert_eq!(platform.count(Op::Exists, ResourceKind::VectorIndex), 2);
    let verification = report.verification.expect("verification");
    assert_eq!(
        verification
            .entry(ResourceKind::VectorIndex)
            .map(|entry| entry.presence),
        Some(Presence::Unknown)
    );
}

#[test]
fn invisible_resource_fails_after_readiness_checks() {
    let mut config = fast_config();
    config.retry.startup_checks = 3;
    let platform = FakePlatform::new().hide_after_create(ResourceKind::DbInstance);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    let instance = report.state(ResourceKind::DbInstance).expect("instance");
    assert_eq!(instance.status, ResourceStatus::Failed);
    assert!(instance
        .message
        .as_deref()
        .is_some_and(|message| message.contains("not ready after 3 checks")));
    assert_eq!(
        status_of(&report, ResourceKind::DbSchema).1,
        Some(SkipReason::BlockedByDependency)
    );
}

#[test]
fn verify_never_creates() {
    let config = fast_config();
    let platform = FakePlatform::with_existing([ResourceKind::Warehouse]);
    let provisioner = Provisioner::for_environment(&platform, &config);
    let first = provisioner.verify(&config);
    let second = provisioner.verify(&config);

    assert!(platform.creates().is_empty());
    assert!(!first.is_healthy());
    assert_eq!(first.counts.present, 1);
    assert_eq!(first.counts.absent, 8);
    assert_eq!(first.entries, second.entries);
    // Catalog absent: nested resources are not checked.
    assert_eq!(platform.count(Op::Exists, ResourceKind::Schema), 0);
    assert_eq!(platform.count(Op::Exists, ResourceKind::DbTableSet), 0);
    assert_eq!(
        first.entry(ResourceKind::Volume).map(|entry| entry.presence),
        Some(Presence::Absent)
    );
}

#[test]
fn dry_run_reports_without_creating() {
    let config = fast_config();
    let platform = FakePlatform::with_existing([ResourceKind::Catalog]);
    let report = Provisioner::for_environment(&platform, &config)
        .dry_run(true)
        .run_all(&config);
    assert!(report.dry_run);
    assert!(platform.creates().is_empty());
    assert_eq!(status_of(&report, ResourceKind::Catalog).0, ResourceStatus::Existed);
    assert_eq!(
        status_of(&report, ResourceKind::Schema),
        (ResourceStatus::Skipped, Some(SkipReason::DryRun))
    );
    // Dependents of a would-be-created resource are not checked.
    for kind in [ResourceKind::DbSchema, ResourceKind::DbTableSet] {
        assert_eq!(
            status_of(&report, kind),
            (ResourceStatus::Skipped, Some(SkipReason::DryRun))
        );
        assert_eq!(platform.count(Op::Exists, kind), 0, "{kind} was checked");
    }
    assert!(report
        .state(ResourceKind::DbSchema)
        .and_then(|state| state.message.as_deref())
        .is_some_and(|message| message.contains("db_instance demo-pg-db would be created first")));
    assert_eq!(report.counts.skipped, 8);
    assert_eq!(report.counts.failed, 0);
    assert_eq!(run_exit_code(&report), EXIT_OK);
    assert!(report.verification.is_none());
}

/// REST kinds from the fake, Postgres kinds through a real psql runner.
#[cfg(unix)]
struct SqlBacked {
    rest: FakePlatform,
    sql: crate::platform::psql::PsqlRunner,
}

#[cfg(unix)]
impl Platform for SqlBacked {
    fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        match spec.kind {
            ResourceKind::DbSchema | ResourceKind::DbTableSet => self.sql.find(spec),
            _ => self.rest.find(spec),
        }
    }

    fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError> {
        self.rest.create(spec)
    }
}

#[cfg(unix)]
#[test]
fn dry_run_treats_missing_database_as_absent() {
    let config = fast_config();
    let sql = crate::platform::psql::PsqlRunner::new(
        &config.name,
        Some(r#"sh -c 'echo "Error: Database instance demo-pg-db does not exist" >&2; exit 1'"#),
        None,
        config.workspace_url.clone(),
        crate::credentials::Credential::new("dapi-test"),
    )
    .expect("runner");
    // The instance answers over REST, but psql cannot reach its database yet.
    let platform = SqlBacked {
        rest: FakePlatform::with_existing([ResourceKind::DbInstance]),
        sql,
    };
    let report = Provisioner::for_environment(&platform, &config)
        .dry_run(true)
        .run_all(&config);
    for kind in [ResourceKind::DbSchema, ResourceKind::DbTableSet] {
        assert_eq!(
            status_of(&report, kind),
            (ResourceStatus::Skipped, Some(SkipReason::DryRun)),
            "{kind}"
        );
    }
    assert_eq!(report.counts.failed, 0);
    assert_eq!(run_exit_code(&report), EXIT_OK);
}

#[test]
fn instance_is_waited_on_until_available() {
    let mut config = fast_config();
    config.retry.startup_checks = 5;
    let platform = FakePlatform::new().starting_for(ResourceKind::DbInstance, 3);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::DbInstance).0, ResourceStatus::Created);
    assert_eq!(platform.count(Op::Ready, ResourceKind::DbInstance), 4);
    assert_eq!(status_of(&report, ResourceKind::DbSchema).0, ResourceStatus::Created);
    assert_eq!(status_of(&report, ResourceKind::DbTableSet).0, ResourceStatus::Created);
    assert_eq!(run_exit_code(&report), EXIT_OK);
}

#[test]
fn startup_wait_is_separate_from_plain_readiness() {
    let mut config = fast_config();
    config.retry.ready_checks = 1;
    config.retry.startup_checks = 3;
    let platform = FakePlatform::new()
        .starting_for(ResourceKind::Warehouse, 2)
        .starting_for(ResourceKind::App, 2);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::Warehouse).0, ResourceStatus::Created);
    assert_eq!(platform.count(Op::Ready, ResourceKind::Warehouse), 3);
    let app = report.state(ResourceKind::App).expect("app");
    assert_eq!(app.status, ResourceStatus::Failed);
    assert!(app
        .message
        .as_deref()
        .is_some_and(|message| message.contains("not ready after 1 checks")));
    assert_eq!(platform.count(Op::Ready, ResourceKind::App), 1);
}

#[test]
fn instance_that_never_starts_blocks_database_objects() {
    let mut config = fast_config();
    config.retry.startup_checks = 3;
    let platform = FakePlatform::new().starting_for(ResourceKind::DbInstance, 10);
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    let instance = report.state(ResourceKind::DbInstance).expect("instance");
    assert_eq!(instance.status, ResourceStatus::Failed);
    assert_eq!(instance.error_class, Some(ErrorClass::Unknown));
    assert_eq!(
        status_of(&report, ResourceKind::DbSchema),
        (ResourceStatus::Skipped, Some(SkipReason::BlockedByDependency))
    );
    assert_eq!(platform.count(Op::Exists, ResourceKind::DbSchema), 0);
}

#[test]
fn skip_list_excludes_without_calls() {
    let mut config = fast_config();
    config.skip = vec![ResourceKind::VectorIndex];
    let platform = FakePlatform::new();
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert_eq!(
        status_of(&report, ResourceKind::VectorIndex),
        (ResourceStatus::Skipped, Some(SkipReason::Excluded))
    );
    assert_eq!(platform.count(Op::Create, ResourceKind::VectorIndex), 0);
    assert_eq!(report.counts.created, 8);
    let verification = report.verification.expect("verification");
    assert!(verification.is_healthy());
    assert!(verification
        .entry(ResourceKind::VectorIndex)
        .is_some_and(|entry| entry.excluded));
}

#[test]
fn excluded_dependency_is_probed() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let report = Provisioner::for_environment(&platform, &config)
        .exclude([ResourceKind::Catalog])
        .run_all(&config);
    assert_eq!(
        status_of(&report, ResourceKind::Schema),
        (ResourceStatus::Skipped, Some(SkipReason::BlockedByDependency))
    );
    assert_eq!(platform.count(Op::Create, ResourceKind::Catalog), 0);

    let platform = FakePlatform::with_existing([ResourceKind::Catalog]);
    let report = Provisioner::for_environment(&platform, &config)
        .exclude([ResourceKind::Catalog])
        .run_all(&config);
    assert_eq!(status_of(&report, ResourceKind::Schema).0, ResourceStatus::Created);
    assert_eq!(status_of(&report, ResourceKind::Volume).0, ResourceStatus::Created);
}

#[test]
fn tables_step_probes_instance_read_only() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let report = Provisioner::for_environment(&platform, &config).run_step(&config, Step::Tables);
    assert_eq!(report.states.len(), 2);
    assert_eq!(report.counts.skipped, 2);
    assert_eq!(platform.count(Op::Create, ResourceKind::DbInstance), 0);
    assert!(platform.count(Op::Exists, ResourceKind::DbInstance) >= 1);
    assert!(platform.creates().is_empty());

    let platform = FakePlatform::with_existing([ResourceKind::DbInstance]);
    let report = Provisioner::for_environment(&platform, &config).run_step(&config, Step::Tables);
    assert_eq!(report.counts.created, 2);
    assert_eq!(
        platform.creates(),
        vec![ResourceKind::DbSchema, ResourceKind::DbTableSet]
    );
}

#[test]
fn resources_step_leaves_tables_alone() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let report =
        Provisioner::for_environment(&platform, &config).run_step(&config, Step::Resources);
    assert_eq!(report.states.len(), 7);
    assert!(report.state(ResourceKind::DbSchema).is_none());
    assert!(!platform.existing().contains(&ResourceKind::DbTableSet));
}

#[test]
fn verify_step_only_checks() {
    let config = fast_config();
    let platform = FakePlatform::new();
    let report = Provisioner::for_environment(&platform, &config).run_step(&config, Step::Verify);
    assert!(report.states.is_empty());
    assert!(platform.creates().is_empty());
    assert!(report.verification.is_some());
}

#[test]
fn unreachable_platform_aborts_the_rest() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Exists,
        ResourceKind::Warehouse,
        PlatformError::Unavailable("host not found".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).run_all(&config);
    assert!(report.aborted);
    assert_eq!(report.states.len(), 9);
    assert_eq!(status_of(&report, ResourceKind::Catalog).0, ResourceStatus::Created);
    assert_eq!(status_of(&report, ResourceKind::Warehouse).0, ResourceStatus::Failed);
    for kind in [
        ResourceKind::VectorIndex,
        ResourceKind::DbInstance,
        ResourceKind::DbSchema,
        ResourceKind::DbTableSet,
        ResourceKind::App,
    ] {
        assert_eq!(
            status_of(&report, kind),
            (ResourceStatus::Skipped, Some(SkipReason::Aborted))
        );
    }
    assert_eq!(platform.count(Op::Exists, ResourceKind::Warehouse), 1);
    assert!(platform
        .calls()
        .iter()
        .all(|(_, kind)| *kind <= ResourceKind::Warehouse));
    assert!(report.verification.is_none());
}

#[test]
fn unreachable_platform_marks_remaining_checks_unknown() {
    let config = fast_config();
    let platform = FakePlatform::new().fail_always(
        Op::Exists,
        ResourceKind::Catalog,
        PlatformError::Unavailable("connection refused".to_string()),
    );
    let report = Provisioner::for_environment(&platform, &config).verify(&config);
    assert!(report.unreachable);
    assert_eq!(report.counts.unknown, 9);
    assert_eq!(platform.calls().len(), 1);
}
