//! Integration tests for relay-ha.
//!
//! Components run against a real in-memory SQLite database and a scripted
//! fake provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, content, credential, service_config, service_env, setup_test_db};
use relay_ha::Error;
use relay_ha::cache::{KeyValueCache, MemoryCache, get_json};
use relay_ha::channels::{ChannelCheck, FailoverOutcome, ProbeOutcome, VerificationOutcome};
use relay_ha::config::{CredentialConfig, PermissionConfig, StorageConfig};
use relay_ha::credentials::CredentialFailover;
use relay_ha::database::list_tables;
use relay_ha::database::models::{ChannelClass, ChannelStatus};
use relay_ha::database::repositories::SqlxPermissionRepository;
use relay_ha::notification::NotificationService;
use relay_ha::permissions::PermissionManager;
use relay_ha::services::{DisasterRecoveryService, ServiceDeps};

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let pool = setup_test_db().await;
        let tables = list_tables(&pool).await.unwrap();
        for expected in [
            "channels",
            "storage_records",
            "channel_health_logs",
            "failover_events",
            "system_health_history",
            "recovery_packages",
        ] {
            assert!(tables.iter().any(|t| t == expected), "{expected} table missing");
        }
    }
}

mod storage_tests {
    use super::*;

    #[tokio::test]
    async fn test_replicates_to_every_requested_channel() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        for (i, id) in ["-1001", "-1002", "-1003"].into_iter().enumerate() {
            h.channel(id, ChannelClass::Primary, i as i64 + 1, 100).await;
        }

        let outcome = h.storage.store_replicated(&content("ep01"), 3).await.unwrap();
        assert_eq!(outcome.stored(), 3);
        assert!(!outcome.is_partial());
        assert!(outcome.failures.is_empty());

        let single = h.storage.store_replicated(&content("ep02"), 1).await.unwrap();
        assert_eq!(single.stored(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_prefers_priority_then_skips_failed() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        let first = h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let second = h.channel("-1002", ChannelClass::Primary, 2, 100).await;
        let third = h.channel("-1003", ChannelClass::Backup, 3, 100).await;
        h.storage.store_replicated(&content("ep01"), 3).await.unwrap();

        assert_eq!(h.storage.retrieve("ep01").await.unwrap().channel_id, first.id);

        h.registry
            .transition(&first.id, ChannelStatus::Failed)
            .await
            .unwrap();
        assert_eq!(h.storage.retrieve("ep01").await.unwrap().channel_id, second.id);

        let fallback = h
            .storage
            .retrieve_excluding("ep01", &[second.id.clone()])
            .await
            .unwrap();
        assert_eq!(fallback.channel_id, third.id);

        assert!(matches!(
            h.storage.retrieve("missing").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_channels_above_threshold_receive_replicas() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        h.channel("-1002", ChannelClass::Primary, 2, 90).await;
        let weak = h.channel("-1003", ChannelClass::Primary, 3, 10).await;

        let outcome = h.storage.store_replicated(&content("ep01"), 3).await.unwrap();
        assert_eq!(outcome.stored(), 2);
        assert!(outcome.is_partial());
        assert!(outcome.records.iter().all(|r| r.channel_id != weak.id));
        assert_eq!(h.storage.active_replica_count(&weak.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_penalizes_channel() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let broken = h.channel("-1002", ChannelClass::Primary, 2, 100).await;
        h.world.fail_channel("-1002");

        let outcome = h.storage.store_replicated(&content("ep01"), 2).await.unwrap();
        assert_eq!(outcome.stored(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel_id, broken.id);

        let penalized = h.registry.get(&broken.id).await.unwrap();
        assert_eq!(
            penalized.health_score,
            100 - StorageConfig::default().storage_error_penalty
        );
    }

    #[tokio::test]
    async fn test_no_healthy_channel_is_exhaustion() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 20).await;

        assert!(matches!(
            h.storage.store_replicated(&content("ep01"), 3).await,
            Err(Error::Exhausted(_))
        ));
        assert!(matches!(
            h.storage.store_replicated(&content("ep01"), 0).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_retrieve_verified_falls_through_unreachable_replica() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let healthy = h.channel("-1002", ChannelClass::Primary, 2, 100).await;
        h.storage.store_replicated(&content("ep01"), 2).await.unwrap();

        h.world.fail_channel("-1001");
        let record = h.storage.retrieve_verified("ep01").await.unwrap();
        assert_eq!(record.channel_id, healthy.id);
    }

    #[tokio::test]
    async fn test_channel_failover_records_affected_files() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        let failing = h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let backup = h.channel("-1009", ChannelClass::Backup, 5, 100).await;
        for i in 0..10 {
            h.storage
                .store_replicated(&content(&format!("ep{i:02}")), 1)
                .await
                .unwrap();
        }
        assert_eq!(h.storage.active_replica_count(&failing.id).await.unwrap(), 10);

        let outcome = h
            .storage
            .trigger_failover(&failing.id, "channel unreachable")
            .await
            .unwrap();
        match outcome {
            FailoverOutcome::Completed {
                files_affected,
                backup_channel_id,
                ..
            } => {
                assert_eq!(files_affected, 10);
                assert_eq!(backup_channel_id, Some(backup.id.clone()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let events = h.failovers.list_for_entity(&failing.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].files_affected, 10);
        assert!(events[0].success);
        assert_eq!(
            h.registry.get(&failing.id).await.unwrap().status,
            ChannelStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_channel_failover_without_replicas_needs_no_backup() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        let empty = h.channel("-1001", ChannelClass::Primary, 1, 100).await;

        let outcome = h.storage.trigger_failover(&empty.id, "manual").await.unwrap();
        assert!(matches!(
            outcome,
            FailoverOutcome::Completed {
                files_affected: 0,
                backup_channel_id: None,
                ..
            }
        ));
        let events = h.failovers.list_for_entity(&empty.id).await.unwrap();
        assert!(events[0].success);
    }
    #[tokio::test]
    async fn test_repeated_verification_marks_replica_corrupted() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let outcome = h.storage.store_replicated(&content("ep01"), 1).await.unwrap();
        let record = &outcome.records[0];

        h.world.fail_channel("-1001");
        for expected in 1..=2 {
            match h.storage.verify_integrity(record).await.unwrap() {
                VerificationOutcome::Failed {
                    consecutive_failures,
                    ..
                } => assert_eq!(consecutive_failures, expected),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(
            h.storage.verify_integrity(record).await.unwrap(),
            VerificationOutcome::Corrupted
        );
        assert!(matches!(
            h.storage.retrieve("ep01").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_returns_stored_record() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        h.channel("-1001", ChannelClass::Primary, 1, 100).await;

        let first = h.storage.store_replicated(&content("ep01"), 1).await.unwrap();
        let second = h.storage.store_replicated(&content("ep01"), 1).await.unwrap();
        assert_eq!(second.records[0].id, first.records[0].id);
        assert_ne!(second.records[0].message_id, first.records[0].message_id);
        assert_eq!(h.storage.retrieve("ep01").await.unwrap(), second.records[0]);

        assert_eq!(
            h.storage.verify_integrity(&second.records[0]).await.unwrap(),
            VerificationOutcome::Verified
        );
    }
}

mod channel_monitor_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_channel_fails_over_during_sweep() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        let failing = h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        let backup = h.channel("-1009", ChannelClass::Backup, 5, 100).await;
        for i in 0..3 {
            h.storage
                .store_replicated(&content(&format!("ep{i:02}")), 1)
                .await
                .unwrap();
        }

        h.world.fail_channel("-1001");
        let report = h.monitor.run_health_checks().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.failovers_triggered, 1);

        let channel = h.registry.get(&failing.id).await.unwrap();
        assert_eq!(channel.status, ChannelStatus::Failed);
        assert_eq!(channel.health_score, 0);

        let events = h.failovers.list_for_entity(&failing.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].files_affected, 3);
        assert_eq!(events[0].replacement_entity_id, Some(backup.id.clone()));

        let cached: ChannelCheck = get_json(h.cache.as_ref(), &format!("channel_health:{}", failing.id))
            .await
            .unwrap()
            .expect("channel health not cached");
        assert!(cached.report.accessibility.is_failed());
        assert_eq!(cached.report.send, ProbeOutcome::NotRun);
        assert_eq!(cached.report.permissions, ProbeOutcome::NotRun);

        let alerts = h
            .cache
            .keys(&format!("channel_alert:{}:*", failing.id))
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);

        let logs = h.health.list_channel_logs(&failing.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].health_score, Some(0));
        assert_eq!(logs[0].status, "failed");

        // Already failed: a second sweep records no new event.
        let again = h.monitor.run_health_checks().await.unwrap();
        assert_eq!(again.failovers_triggered, 0);
        assert_eq!(h.failovers.list_for_entity(&failing.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_permissions_degrade_channel() {
        let h = Harness::new(vec![credential("primary", 1)]).await;
        let restricted = h.channel("-1001", ChannelClass::Primary, 1, 100).await;
        h.world.restrict_to_send("-1001");
        h.world.refuse_deletes(true);

        let report = h.monitor.run_health_checks().await.unwrap();
        assert_eq!(report.degraded, 1);
        assert_eq!(report.failovers_triggered, 0);

        let channel = h.registry.get(&restricted.id).await.unwrap();
        assert_eq!(channel.status, ChannelStatus::Degraded);
        assert_eq!(channel.health_score, 50);

        let cached: ChannelCheck =
            get_json(h.cache.as_ref(), &format!("channel_health:{}", restricted.id))
                .await
                .unwrap()
                .expect("channel health not cached");
        assert!(cached.report.send.is_failed());
        assert!(cached.report.permissions.is_failed());

        let degraded = h
            .cache
            .keys(&format!("channel_degraded:{}:*", restricted.id))
            .await
            .unwrap();
        assert_eq!(degraded.len(), 1);

        let logs = h.health.list_channel_logs(&restricted.id, 10).await.unwrap();
        assert_eq!(logs[0].status, "degraded");
        assert!(logs[0].error_message.as_deref().unwrap().contains("missing"));
        assert!(h.failovers.list_for_entity(&restricted.id).await.unwrap().is_empty());
    }
}

mod credential_tests {
    use super::*;

    #[tokio::test]
    async fn test_failover_after_consecutive_errors() {
        let h = Harness::new(vec![
            credential("a", 1),
            credential("b", 2),
            credential("c", 3),
        ])
        .await;
        let threshold = CredentialConfig::default().max_consecutive_errors;
        h.world.fail_credential(&credential("a", 1).secret);

        for _ in 1..threshold {
            assert!(h.credentials.check_active().await.unwrap().is_none());
        }
        let result = h.credentials.check_active().await.unwrap();
        assert_eq!(
            result,
            Some(CredentialFailover::Promoted {
                from: "@relay_1_bot".into(),
                to: "@relay_2_bot".into(),
            })
        );

        assert_eq!(h.credentials.active().unwrap().spec.id, "b");
        let backups: Vec<String> = h
            .credentials
            .backups()
            .into_iter()
            .map(|c| c.spec.id)
            .collect();
        assert_eq!(backups, vec!["c", "a"]);

        let events = h.failovers.list_for_entity("a").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].replacement_entity_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_failover_exhausted_keeps_active() {
        let h = Harness::new(vec![credential("a", 1), credential("b", 2)]).await;
        h.world.fail_credential(&credential("b", 2).secret);

        let result = h.credentials.force_failover("manual").await.unwrap();
        assert!(matches!(result, CredentialFailover::Exhausted { .. }));
        assert_eq!(h.credentials.active().unwrap().spec.id, "a");
    }

    #[tokio::test]
    async fn test_exhausted_failover_is_reported_once() {
        let h = Harness::new(vec![credential("a", 1), credential("b", 2)]).await;
        let threshold = CredentialConfig::default().max_consecutive_errors;
        h.world.fail_credential(&credential("a", 1).secret);
        h.world.fail_credential(&credential("b", 2).secret);

        for _ in 1..threshold {
            assert!(h.credentials.check_active().await.unwrap().is_none());
        }
        for _ in 0..3 {
            let result = h.credentials.check_active().await.unwrap();
            assert!(matches!(result, Some(CredentialFailover::Exhausted { .. })));
        }
        assert_eq!(h.credentials.active().unwrap().spec.id, "a");
        assert_eq!(h.failovers.list_for_entity("a").await.unwrap().len(), 1);

        h.world.heal_credential(&credential("b", 2).secret);
        let result = h.credentials.check_active().await.unwrap();
        assert!(matches!(result, Some(CredentialFailover::Promoted { .. })));
        assert_eq!(h.credentials.active().unwrap().spec.id, "b");

        let events = h.failovers.list_for_entity("a").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.replacement_entity_id.as_deref() == Some("b")));
    }

    #[tokio::test]
    async fn test_failover_not_needed_below_threshold() {
        let h = Harness::with_config(
            vec![credential("a", 1), credential("b", 2)],
            CredentialConfig {
                max_consecutive_errors: 3,
                ..CredentialConfig::default()
            },
            StorageConfig::default(),
        )
        .await;

        let result = h.credentials.failover_to_backup().await.unwrap();
        assert_eq!(
            result,
            CredentialFailover::NotNeeded {
                consecutive_errors: 0,
                threshold: 3
            }
        );
    }

    #[tokio::test]
    async fn test_bootstrap_requires_one_valid_credential() {
        let h = Harness::new(vec![credential("a", 1)]).await;
        h.world.fail_credential(&credential("x", 9).secret);
        let err = h
            .credentials
            .initialize_all(vec![credential("x", 9)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }
}

mod permission_tests {
    use super::*;

    fn manager(h: &Harness) -> PermissionManager {
        PermissionManager::new(
            h.credentials.clone(),
            Arc::new(SqlxPermissionRepository::new(h.pool.clone())),
            h.cache.clone(),
            Arc::new(NotificationService::disabled()),
            PermissionConfig {
                log_channel: Some("-100100".into()),
                content_channels: vec!["-100200".into()],
                ..PermissionConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_synchronize_every_credential() {
        let h = Harness::new(vec![credential("a", 1), credential("b", 2)]).await;
        let permissions = manager(&h);

        let report = permissions.synchronize_permissions().await.unwrap();
        assert_eq!(report.total_tokens, 2);
        assert_eq!(report.successful_tokens, 2);
        assert_eq!(report.failed_tokens, 0);
        assert_eq!(h.world.message_count(), 0);

        let status = permissions.get_permission_status().await.unwrap();
        assert_eq!(status.total_channels, 2);
        assert_eq!(status.verified_channels, 2);
    }

    #[tokio::test]
    async fn test_unreachable_channel_misses_every_capability() {
        let h = Harness::new(vec![credential("a", 1)]).await;
        let permissions = manager(&h);
        h.world.fail_channel("-100200");

        let result = permissions.verify_channel_access("-100200").await.unwrap();
        assert!(!result.verified());
        assert_eq!(result.missing().len(), 3);

        let status = permissions.get_permission_status().await.unwrap();
        assert_eq!(status.failed_channels, 1);

        assert!(matches!(
            permissions.verify_channel_access("-100999").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_undeleted_test_messages_are_cleaned_up() {
        let h = Harness::new(vec![credential("a", 1)]).await;
        let permissions = manager(&h);

        h.world.refuse_deletes(true);
        let result = permissions.verify_channel_access("-100100").await.unwrap();
        assert!(!result.verified());
        assert_eq!(permissions.pending_test_messages(), 1);
        assert_eq!(h.world.message_count(), 1);

        h.world.refuse_deletes(false);
        assert_eq!(permissions.cleanup_test_messages().await, 1);
        assert_eq!(permissions.pending_test_messages(), 0);
        assert_eq!(h.world.message_count(), 0);
    }
}

mod service_tests {
    use super::*;

    async fn service(dir: &std::path::Path) -> DisasterRecoveryService {
        let primary = credential("primary", 1);
        let deps = ServiceDeps {
            connector: Arc::new(common::FakeConnector::default()),
            cache: Arc::new(MemoryCache::new()),
            env: Arc::new(service_env(&primary)),
        };
        DisasterRecoveryService::initialize(service_config(dir, primary), deps)
            .await
            .expect("Failed to initialize service")
    }

    #[tokio::test]
    async fn test_package_roundtrip_through_backup_locations() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let saved = service.create_recovery_package().await.unwrap();
        assert_eq!(saved.locations.len(), 2);
        assert!(saved.package.verify().is_ok());
        assert_ne!(
            saved.package.environment_variables.variables["BOT_TOKEN"],
            credential("primary", 1).secret
        );

        let loaded = service
            .load_recovery_package(&saved.package.package_id)
            .await
            .unwrap();
        assert_eq!(loaded, saved.package);

        let status = service.get_system_status().await.unwrap();
        assert_eq!(status.recent_packages.len(), 1);

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_package_is_rejected_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let mut package = service.create_recovery_package().await.unwrap().package;
        package
            .environment_variables
            .variables
            .insert("LOG_CHANNEL".into(), "-100666".into());

        let err = service.execute_recovery(&package).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(!dir.path().join(".env.recovery").exists());

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_restores_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let package = service.create_recovery_package().await.unwrap().package;

        let report = service.execute_recovery(&package).await.unwrap();
        assert_eq!(report.steps.len(), 7);
        assert!(report.steps[0].success);

        let restored = std::fs::read_to_string(dir.path().join(".env.recovery")).unwrap();
        assert!(restored.contains("LOG_CHANNEL=-100100"));
        assert!(restored.contains(&format!("BOT_TOKEN={}", credential("primary", 1).secret)));
        assert!(dir.path().join("scripts").join("quick_deploy.sh").exists());

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restored_cache_keys_keep_expiring() {
        let dir = tempfile::tempdir().unwrap();
        let primary = credential("primary", 1);
        let cache = Arc::new(MemoryCache::new());
        let deps = ServiceDeps {
            connector: Arc::new(common::FakeConnector::default()),
            cache: cache.clone(),
            env: Arc::new(service_env(&primary)),
        };
        let service = DisasterRecoveryService::initialize(service_config(dir.path(), primary), deps)
            .await
            .expect("Failed to initialize service");

        let key = "channel_health:-100100";
        cache
            .set_ex(key, "{\"score\":100}", Duration::from_secs(120))
            .await
            .unwrap();
        let package = service.create_recovery_package().await.unwrap().package;
        assert!(package.redis_state.key_ttls_secs.contains_key(key));

        cache.delete(key).await.unwrap();
        service.execute_recovery(&package).await.unwrap();

        assert_eq!(cache.get(key).await.unwrap().as_deref(), Some("{\"score\":100}"));
        let ttl = cache.ttl(key).await.unwrap().expect("restored key has no expiry");
        assert!(ttl <= Duration::from_secs(120));

        for restored in package.redis_state.critical_keys.keys() {
            assert!(cache.ttl(restored).await.unwrap().is_some(), "{restored} never expires");
        }

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_then_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        service.start();
        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.get_system_status().await.unwrap().background_tasks_running);

        service
            .shutdown_with_timeout(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(service.is_shutting_down());
    }

    #[tokio::test]
    async fn test_initialize_without_valid_credentials_fails() {
        let dir = tempfile::tempdir().unwrap();
        let primary = credential("primary", 1);
        let connector = common::FakeConnector::default();
        connector.world.fail_credential(&primary.secret);

        let deps = ServiceDeps {
            connector: Arc::new(connector),
            cache: Arc::new(MemoryCache::new()),
            env: Arc::new(service_env(&primary)),
        };
        let result =
            DisasterRecoveryService::initialize(service_config(dir.path(), primary), deps).await;
        assert!(matches!(result, Err(Error::Bootstrap(_))));
    }
}
