//! Integration tests for the delegation lifecycle: dispatch, polling,
//! settlement, cancellation, timeouts and result aggregation.

mod common;

use common::*;
use delegation_core::constants::metrics as metric_names;
use delegation_core::events::{EventKind, EventPayload};
use delegation_core::models::ComponentSpec;
use delegation_core::orchestration::{
    CultivationStatus, DelegateOptions, DelegationErrorType, DelegationInterface, DownstreamError,
    ResultStatus,
};
use delegation_core::state_machine::DelegationState;
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_default_feature_delegation_completes() {
    let harness = TestHarness::new();
    harness
        .executor
        .push_status(CultivationStatus::completed(ids(&["feature_c1_main"]), Vec::new()));

    let spec = ComponentSpec::new("c1", "C1", "d");
    let result = harness
        .interface
        .delegate_component("c1", &spec, DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Complete);
    assert_eq!(result.feature_count, 1);
    assert_eq!(result.completed_features, ids(&["feature_c1_main"]));

    let delegation_id = result.delegation_id.expect("accepted delegation has an id");
    let record = harness
        .interface
        .get_delegation_status(&delegation_id)
        .await
        .expect("record registered");
    assert_eq!(record.state, DelegationState::Completed);
    assert_eq!(record.feature_ids, ids(&["feature_c1_main"]));
    assert!((record.progress_percentage - 100.0).abs() < f64::EPSILON);
    assert!(record.completion_time.is_some());

    let kinds = harness.event_kinds(&delegation_id);
    assert_eq!(kinds.first(), Some(&EventKind::Initiated));
    assert_eq!(kinds.last(), Some(&EventKind::Completed));

    let latest = harness
        .interface
        .notifier()
        .get_latest_event(&delegation_id)
        .await
        .expect("latest event persisted");
    assert_eq!(latest.kind(), EventKind::Completed);
    assert_eq!(harness.metrics.count(metric_names::DELEGATION_STARTED), 1);
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected_without_registration() {
    let harness = TestHarness::new();
    let spec = flat_component("c2", &["c2_a"]).with_feature(
        delegation_core::models::FeatureDraft::named("ghost user", "Depends on nothing real")
            .with_id("c2_b")
            .depends_on("missing_feature"),
    );

    let result = harness
        .interface
        .delegate_component("c2", &spec, DelegateOptions::new())
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::InvalidFeature));
    assert!(result.delegation_id.is_none());
    assert!(!result.validation_errors.is_empty());
    assert!(harness.interface.tracker().get_all_delegations().await.is_empty());
    assert!(harness.executor.kickoffs().is_empty());
}

#[tokio::test]
async fn test_incomplete_component_is_rejected() {
    let harness = TestHarness::new();
    let spec = ComponentSpec::new("c3", "", "no name");

    let result = harness
        .interface
        .delegate_component("c3", &spec, DelegateOptions::new())
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::InvalidComponent));
    assert!(harness.interface.get_component_status("c3").await.is_none());
}

#[tokio::test]
async fn test_downstream_silence_times_out() {
    let mut config = fast_config();
    config.polling.max_wait_ms = 80;
    let harness = TestHarness::with_config(config);

    let result = harness
        .interface
        .delegate_component("c4", &chained_component("c4", &["c4_a", "c4_b"]), DelegateOptions::new())
        .await;
    let delegation_id = result.delegation_id.expect("accepted");

    let record = harness
        .wait_for_record(&delegation_id, SETTLE, |r| r.state == DelegationState::Failed)
        .await;
    assert_eq!(record.error_type, Some(DelegationErrorType::Timeout));

    let failed = harness
        .wait_for_events(&delegation_id, EventKind::Failed, 1, SETTLE)
        .await;
    match &failed[0].payload {
        EventPayload::Failed {
            error_type,
            failed_features,
            ..
        } => {
            assert_eq!(*error_type, DelegationErrorType::Timeout);
            assert_eq!(failed_features, &ids(&["c4_a", "c4_b"]));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_reports_only_unfinished_features() {
    let harness = TestHarness::new();
    harness
        .executor
        .set_idle_status(CultivationStatus::in_progress(ids(&["c5_a"]), 33.3));

    let result = harness
        .interface
        .delegate_component("c5", &flat_component("c5", &["c5_a", "c5_b", "c5_c"]), DelegateOptions::new())
        .await;
    let delegation_id = result.delegation_id.expect("accepted");

    harness
        .wait_for_record(&delegation_id, SETTLE, |r| {
            r.state == DelegationState::InProgress && r.completed_features.len() == 1
        })
        .await;

    let cancellation = harness
        .interface
        .cancel_delegation(&delegation_id, "caller lost interest")
        .await;
    assert_eq!(cancellation.status, ResultStatus::Cancelled);
    assert_eq!(cancellation.cancelled_features, ids(&["c5_b", "c5_c"]));
    assert_eq!(cancellation.state, Some(DelegationState::Cancelled));

    let cancelled = harness
        .wait_for_events(&delegation_id, EventKind::Cancelled, 1, SETTLE)
        .await;
    match &cancelled[0].payload {
        EventPayload::Cancelled {
            cancelled_features,
            completed_features,
            reason,
            ..
        } => {
            assert_eq!(cancelled_features, &ids(&["c5_b", "c5_c"]));
            assert_eq!(completed_features, &ids(&["c5_a"]));
            assert_eq!(reason, "caller lost interest");
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // The poll loop must not overwrite the cancellation
    tokio::time::sleep(Duration::from_millis(60)).await;
    let record = harness
        .interface
        .get_delegation_status(&delegation_id)
        .await
        .expect("record kept");
    assert_eq!(record.state, DelegationState::Cancelled);
    assert!(!harness.interface.is_active(&delegation_id));
    assert!(!harness.event_kinds(&delegation_id).contains(&EventKind::Failed));
}

#[tokio::test]
async fn test_cancel_unknown_and_settled_delegations() {
    let harness = TestHarness::new();
    let missing = harness.interface.cancel_delegation("nope", "test").await;
    assert_eq!(missing.status, ResultStatus::NotFound);

    harness
        .executor
        .push_status(CultivationStatus::completed(ids(&["c6_a"]), Vec::new()));
    let result = harness
        .interface
        .delegate_component("c6", &flat_component("c6", &["c6_a"]), DelegateOptions::new().wait(None))
        .await;
    let delegation_id = result.delegation_id.expect("accepted");

    let settled = harness.interface.cancel_delegation(&delegation_id, "too late").await;
    assert_eq!(settled.status, ResultStatus::InvalidState);
    assert_eq!(settled.state, Some(DelegationState::Completed));
}

#[tokio::test]
async fn test_caller_wait_timeout_leaves_delegation_running() {
    let harness = TestHarness::new();

    let result = harness
        .interface
        .delegate_component(
            "c7",
            &flat_component("c7", &["c7_a"]),
            DelegateOptions::new().wait(Some(Duration::from_millis(30))),
        )
        .await;

    assert_eq!(result.status, ResultStatus::Timeout);
    let delegation_id = result.delegation_id.expect("accepted");
    assert!(harness.interface.is_active(&delegation_id));

    let record = harness
        .interface
        .get_delegation_status(&delegation_id)
        .await
        .expect("registered");
    assert!(record.state.is_active());

    let cancellation = harness.interface.cancel_delegation(&delegation_id, "cleanup").await;
    assert_eq!(cancellation.status, ResultStatus::Cancelled);
}

#[tokio::test]
async fn test_progress_events_track_reported_completions() {
    let harness = TestHarness::new();
    harness
        .executor
        .push_status(CultivationStatus::in_progress(Vec::new(), 0.0))
        .push_status(CultivationStatus::in_progress(ids(&["c8_a"]), 50.0))
        .push_status(CultivationStatus::completed(ids(&["c8_a", "c8_b"]), Vec::new()));

    let result = harness
        .interface
        .delegate_component("c8", &chained_component("c8", &["c8_a", "c8_b"]), DelegateOptions::new().wait(None))
        .await;
    assert_eq!(result.status, ResultStatus::Complete);
    let delegation_id = result.delegation_id.expect("accepted");

    let progress = harness
        .wait_for_events(&delegation_id, EventKind::Progress, 1, SETTLE)
        .await;
    match &progress[0].payload {
        EventPayload::Progress {
            progress_percentage,
            completed_features,
            pending_features,
            ..
        } => {
            assert!((progress_percentage - 50.0).abs() < f64::EPSILON);
            assert_eq!(completed_features, &ids(&["c8_a"]));
            assert_eq!(pending_features, &ids(&["c8_b"]));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_status_errors_are_retried_by_the_poll_loop() {
    let harness = TestHarness::new();
    harness
        .executor
        .push_status_error(DownstreamError::Communication("connection reset".into()))
        .push_status_error(DownstreamError::Timeout("slow".into()))
        .push_status(CultivationStatus::completed(ids(&["c9_a"]), Vec::new()));

    let result = harness
        .interface
        .delegate_component("c9", &flat_component("c9", &["c9_a"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Complete);
    assert_eq!(harness.executor.status_calls(), 3);
}

#[tokio::test]
async fn test_kickoff_failure_fails_every_feature() {
    let harness = TestHarness::new();
    harness
        .executor
        .fail_next_kickoff(DownstreamError::Unavailable("maintenance".into()));

    let result = harness
        .interface
        .delegate_component("c10", &flat_component("c10", &["c10_a", "c10_b"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::PhaseThreeUnavailable));
    assert_eq!(result.failed_features, ids(&["c10_a", "c10_b"]));
    assert_eq!(harness.executor.status_calls(), 0);
}

#[tokio::test]
async fn test_kickoff_rejection_is_feature_creation_failure() {
    let harness = TestHarness::new();
    harness.executor.reject_next_kickoff("unknown feature layout");

    let result = harness
        .interface
        .delegate_component("c11", &flat_component("c11", &["c11_a"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::FeatureCreationFailed));
    assert_eq!(result.message.as_deref(), Some("unknown feature layout"));
}

#[tokio::test]
async fn test_kickoff_rejection_message_is_classified() {
    let harness = TestHarness::new();
    harness.executor.reject_next_kickoff("worker quota exceeded");

    let result = harness
        .interface
        .delegate_component("c11q", &flat_component("c11q", &["c11q_a"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::ResourceExhaustion));
}

#[tokio::test]
async fn test_untyped_completion_message_is_classified() {
    let harness = TestHarness::new();
    harness.executor.push_status(
        CultivationStatus::completed(ids(&["c11m_a"]), ids(&["c11m_b"]))
            .with_error_message("c11m_b: 4 tests failing"),
    );

    let result = harness
        .interface
        .delegate_component("c11m", &flat_component("c11m", &["c11m_a", "c11m_b"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Partial);
    assert_eq!(result.error_type, Some(DelegationErrorType::FeatureTestingFailed));
}

#[tokio::test]
async fn test_panicking_downstream_fails_the_delegation() {
    let harness = TestHarness::new();
    harness.executor.panic_on_status();

    let result = harness
        .interface
        .delegate_component("c12", &flat_component("c12", &["c12_a"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error_type, Some(DelegationErrorType::UnknownError));
    assert!(harness
        .errors
        .errors()
        .iter()
        .any(|error| error.error.contains("status endpoint exploded")));
}

#[tokio::test]
async fn test_partial_report_without_recovery() {
    let harness = TestHarness::new();
    harness.executor.push_status(
        CultivationStatus::completed(ids(&["c13_a"]), ids(&["c13_b"]))
            .with_error(DelegationErrorType::FeatureTestingFailed, "tests red"),
    );

    let result = harness
        .interface
        .delegate_component("c13", &flat_component("c13", &["c13_a", "c13_b"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Partial);
    assert_eq!(result.completed_features, ids(&["c13_a"]));
    assert_eq!(result.failed_features, ids(&["c13_b"]));
    assert_eq!(result.error_type, Some(DelegationErrorType::FeatureTestingFailed));

    let delegation_id = result.delegation_id.expect("accepted");
    let record = harness
        .interface
        .get_delegation_status(&delegation_id)
        .await
        .expect("registered");
    assert_eq!(record.feature_errors.get("c13_b").map(String::as_str), Some("tests red"));
}

#[tokio::test]
async fn test_unreported_features_fail_on_completion() {
    let harness = TestHarness::new();
    harness
        .executor
        .push_status(CultivationStatus::completed(ids(&["c14_a"]), Vec::new()));

    let result = harness
        .interface
        .delegate_component("c14", &flat_component("c14", &["c14_a", "c14_b"]), DelegateOptions::new().wait(None))
        .await;

    assert_eq!(result.status, ResultStatus::Partial);
    assert_eq!(result.failed_features, ids(&["c14_b"]));
}

#[tokio::test]
async fn test_result_aggregation_hoists_shared_imports() {
    let harness = TestHarness::new();
    harness
        .executor
        .set_artifact("c15_a", "import json\n\ndef load():\n    return json.loads('{}')\n")
        .set_artifact("c15_b", "import json\nimport os\n\ndef dump():\n    return os.sep\n")
        .push_status(CultivationStatus::completed(ids(&["c15_a", "c15_b"]), Vec::new()));

    let result = harness
        .interface
        .delegate_component("c15", &flat_component("c15", &["c15_a", "c15_b"]), DelegateOptions::new().wait(None))
        .await;
    let delegation_id = result.delegation_id.expect("accepted");

    let aggregated = harness.interface.get_delegation_result(&delegation_id).await;
    assert_eq!(aggregated.status, ResultStatus::Complete);
    assert_eq!(aggregated.features.len(), 2);
    assert_eq!(aggregated.features[0].feature_name, "c15_a feature");
    assert!(aggregated.features.iter().all(|feature| !feature.is_fallback));

    let output = aggregated.output.expect("combined output");
    assert!(output.starts_with("# Component: c15\n"));
    assert_eq!(output.matches("import json").count(), 1);
    assert!(output.contains("# Feature: c15_a feature (c15_a)"));
    assert!(output.contains("def dump():"));
}

#[tokio::test]
async fn test_result_of_unsettled_and_unknown_delegations() {
    let harness = TestHarness::new();
    let unknown = harness.interface.get_delegation_result("missing").await;
    assert_eq!(unknown.status, ResultStatus::NotFound);
    assert!(unknown.output.is_none());

    let result = harness
        .interface
        .delegate_component("c16", &flat_component("c16", &["c16_a"]), DelegateOptions::new())
        .await;
    let delegation_id = result.delegation_id.expect("accepted");

    let pending = harness.interface.get_delegation_result(&delegation_id).await;
    assert_eq!(pending.status, ResultStatus::InProgress);
    assert!(pending.output.is_none());

    harness.interface.cancel_delegation(&delegation_id, "done testing").await;
    let cancelled = harness.interface.get_delegation_result(&delegation_id).await;
    assert_eq!(cancelled.status, ResultStatus::Cancelled);
}

#[tokio::test]
async fn test_nested_coordinator_handles_kickoff() {
    let executor = MockFeatureExecutor::new();
    let coordinator = RecordingCoordinator::new(executor.clone());
    executor.push_status(CultivationStatus::completed(ids(&["c17_a"]), Vec::new()));

    let interface = DelegationInterface::builder(executor.shared())
        .config(fast_config())
        .nested_coordinator(Arc::new(coordinator.clone()))
        .build()
        .expect("valid configuration");

    let result = interface
        .delegate_component(
            "c17",
            &flat_component("c17", &["c17_a"]),
            DelegateOptions::new().with_operation_id("op_nested").wait(None),
        )
        .await;

    assert_eq!(result.status, ResultStatus::Complete);
    assert_eq!(result.operation_id.as_deref(), Some("op_nested"));
    let requests = coordinator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].component_id, "c17");
    assert_eq!(requests[0].operation_id, "op_nested");
    assert_eq!(requests[0].features.len(), 1);
}

#[tokio::test]
async fn test_duplicate_delegation_id_is_rejected() {
    let harness = TestHarness::new();
    let options = DelegateOptions::new().with_delegation_id("delegation_fixed");

    let first = harness
        .interface
        .delegate_component("c18", &flat_component("c18", &["c18_a"]), options.clone())
        .await;
    assert_eq!(first.status, ResultStatus::Initiated);

    let second = harness
        .interface
        .delegate_component("c18", &flat_component("c18", &["c18_a"]), options)
        .await;
    assert_eq!(second.status, ResultStatus::Error);
    assert_eq!(second.delegation_id.as_deref(), Some("delegation_fixed"));

    harness.interface.cancel_delegation("delegation_fixed", "cleanup").await;
}

#[tokio::test]
async fn test_component_status_points_at_latest_delegation() {
    let harness = TestHarness::new();
    harness
        .executor
        .push_status(CultivationStatus::completed(ids(&["c19_a"]), Vec::new()));

    let result = harness
        .interface
        .delegate_component("c19", &flat_component("c19", &["c19_a"]), DelegateOptions::new().wait(None))
        .await;

    let record = harness
        .interface
        .get_component_status("c19")
        .await
        .expect("component tracked");
    assert_eq!(Some(record.delegation_id), result.delegation_id);
    assert_eq!(harness.interface.tracker().get_feature_component("c19_a").as_deref(), Some("c19"));
}
