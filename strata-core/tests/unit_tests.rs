//! Unit tests for strata-core

use std::io::Write;
use std::time::Duration;

use strata_core::{
    config::{LogFormat, LogLevel},
    metrics::QueryOutcome,
    Activity, Config, Error, HostId, LifecycleState, Metrics, PartitionCoordinate, PartitionId,
    PartitionRuntimeState, StorageTier, TenantId, NO_SEQUENCE,
};

mod config_tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_json_file_round_trip() {
        let mut config = Config::default();
        config.lifecycle.rebuild_batch_size = 64;
        config.lifecycle.tolerate_rebuilding_reads = true;
        config.solver.default_escalation = Duration::from_millis(250);
        config.orchestrator.global_timeout = Duration::from_secs(3);
        config.monitoring.logging.format = LogFormat::Json;

        let file = write_config(&serde_json::to_string_pretty(&config).unwrap());
        let loaded = Config::from_json_file(file.path()).unwrap();

        assert_eq!(loaded.lifecycle.rebuild_batch_size, 64);
        assert!(loaded.lifecycle.tolerate_rebuilding_reads);
        assert_eq!(loaded.solver.default_escalation, Duration::from_millis(250));
        assert_eq!(loaded.orchestrator.global_timeout, Duration::from_secs(3));
        assert_eq!(loaded.monitoring.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let file = write_config(r#"{ "solver": { "max_number_of_solvers": 5 }, "monitoring": { "logging": { "level": "debug" } } }"#);
        let loaded = Config::from_json_file(file.path()).unwrap();

        assert_eq!(loaded.solver.max_number_of_solvers, 5);
        assert_eq!(loaded.solver.initial_solvers, 1);
        assert_eq!(loaded.lifecycle.rebuild_batch_size, 1000);
        assert_eq!(loaded.monitoring.logging.level, LogLevel::Debug);
        assert_eq!(loaded.monitoring.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let file = write_config("{ not json");
        let err = Config::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_values_are_rejected_on_load() {
        let file = write_config(r#"{ "merge_budget": { "persistent": { "cap": 0, "max_overage": 10 } } }"#);
        let err = Config::from_json_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("merge_budget.persistent"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = Config::default();
        config.solver.initial_solvers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.solver.max_concurrent_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lifecycle.rebuild_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.merge_budget.transient.max_overage = -1;
        assert!(config.validate().is_err());
    }
}

mod type_tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use LifecycleState::*;
        let allowed = [
            (Offline, Bootstrap),
            (Bootstrap, Rebuilding),
            (Rebuilding, Online),
            (Online, Obsolete),
            (Obsolete, Rebuilding),
            (Bootstrap, Offline),
            (Rebuilding, Offline),
            (Online, Offline),
            (Obsolete, Offline),
        ];
        for from in LifecycleState::ALL {
            for to in LifecycleState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_initial_runtime_state() {
        let state = PartitionRuntimeState::default();
        assert_eq!(state.lifecycle_state, LifecycleState::Offline);
        assert_eq!(state.storage_tier, StorageTier::Memory);
        assert_eq!(state.last_indexed_sequence, NO_SEQUENCE);
        assert!(!state.destroyed);
    }

    #[test]
    fn test_coordinate_display_and_order() {
        let tenant = TenantId::new("acme");
        let older = PartitionCoordinate::new(tenant.clone(), PartitionId(1), HostId::new("h2"));
        let newer = PartitionCoordinate::new(tenant, PartitionId(2), HostId::new("h1"));
        assert_eq!(newer.to_string(), "acme/2@h1");
        assert!(older < newer);
        assert_eq!(PartitionId(1).next(), PartitionId(2));
    }

    #[test]
    fn test_activity_terms_and_size() {
        let small = Activity::new(0, vec!["login".into()], "alice");
        let large = Activity::new(1, vec!["login".into(), "admin".into()], "x".repeat(1024));
        assert!(small.has_term("login"));
        assert!(!small.has_term("admin"));
        assert!(large.estimated_size() > small.estimated_size() + 1024);
    }
}

mod metrics_tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = Metrics::new();
        metrics.record_attempt();
        metrics.record_attempt();
        metrics.record_escalation();
        metrics.record_attempts_cancelled(1);
        metrics.record_solver_success(Duration::from_millis(12));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.escalations, 1);
        assert_eq!(snapshot.attempts_cancelled, 1);
        assert_eq!(snapshot.solver_successes, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let tenant = TenantId::new("acme");
        metrics.clone().record_query(&tenant, QueryOutcome::Abandoned, Duration::from_millis(5));

        assert_eq!(metrics.snapshot().queries, 1);
        assert_eq!(metrics.snapshot().partial_results, 1);
        assert_eq!(metrics.tenant_snapshot(&tenant).abandoned, 1);
        assert_eq!(metrics.tenant_snapshot(&TenantId::new("other")).calls, 0);
    }
}
