#![allow(dead_code)]

use async_trait::async_trait;
use delegation_core::models::FeatureSpec;
use delegation_core::orchestration::{
    CultivationStatus, DownstreamError, FeatureExecutor, FeatureRetryResponse, FeatureStatus,
    KickoffResponse, NestedExecutionCoordinator, NestedExecutionRequest,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Scriptable stand-in for the downstream feature subsystem.
///
/// Status answers are consumed in order across every operation; once the
/// script runs out the idle status is returned. Clones share state, so a test
/// can keep a handle while the interface owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFeatureExecutor {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    kickoff_failures: VecDeque<DownstreamError>,
    kickoff_rejections: VecDeque<String>,
    statuses: VecDeque<Result<CultivationStatus, DownstreamError>>,
    idle_status: Option<CultivationStatus>,
    status_delay: Option<Duration>,
    panic_on_status: bool,
    /// `None` is a successful retry, `Some` carries the failure message
    retry_outcomes: HashMap<String, VecDeque<Option<String>>>,
    artifacts: HashMap<String, String>,
    kickoffs: Vec<MockKickoff>,
    status_calls: usize,
    retried_features: Vec<String>,
}

/// One recorded kickoff call
#[derive(Debug, Clone)]
pub struct MockKickoff {
    pub operation_id: String,
    pub feature_ids: Vec<String>,
}

impl MockFeatureExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn FeatureExecutor> {
        Arc::new(self.clone())
    }

    /// Queues a status answer
    pub fn push_status(&self, status: CultivationStatus) -> &Self {
        self.state.lock().statuses.push_back(Ok(status));
        self
    }

    /// Queues a failed status query
    pub fn push_status_error(&self, error: DownstreamError) -> &Self {
        self.state.lock().statuses.push_back(Err(error));
        self
    }

    /// Answer used once the script is exhausted
    pub fn set_idle_status(&self, status: CultivationStatus) -> &Self {
        self.state.lock().idle_status = Some(status);
        self
    }

    pub fn set_status_delay(&self, delay: Duration) -> &Self {
        self.state.lock().status_delay = Some(delay);
        self
    }

    pub fn panic_on_status(&self) -> &Self {
        self.state.lock().panic_on_status = true;
        self
    }

    /// Next kickoff returns an error
    pub fn fail_next_kickoff(&self, error: DownstreamError) -> &Self {
        self.state.lock().kickoff_failures.push_back(error);
        self
    }

    /// Next kickoff is accepted but reports that the features were not created
    pub fn reject_next_kickoff(&self, message: &str) -> &Self {
        self.state
            .lock()
            .kickoff_rejections
            .push_back(message.to_string());
        self
    }

    /// Queues per-feature retry outcomes; unscripted retries succeed
    pub fn script_retry(&self, feature_id: &str, outcomes: &[bool]) -> &Self {
        self.state
            .lock()
            .retry_outcomes
            .entry(feature_id.to_string())
            .or_default()
            .extend(
                outcomes
                    .iter()
                    .map(|ok| (!ok).then(|| format!("retry of {feature_id} failed"))),
            );
        self
    }

    /// Queues one failed retry reporting `message`
    pub fn script_retry_error(&self, feature_id: &str, message: &str) -> &Self {
        self.state
            .lock()
            .retry_outcomes
            .entry(feature_id.to_string())
            .or_default()
            .push_back(Some(message.to_string()));
        self
    }

    pub fn set_artifact(&self, feature_id: &str, artifact: &str) -> &Self {
        self.state
            .lock()
            .artifacts
            .insert(feature_id.to_string(), artifact.to_string());
        self
    }

    pub fn kickoffs(&self) -> Vec<MockKickoff> {
        self.state.lock().kickoffs.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn retried_features(&self) -> Vec<String> {
        self.state.lock().retried_features.clone()
    }

    fn record_kickoff(&self, operation_id: &str, features: &[FeatureSpec]) -> Result<KickoffResponse, DownstreamError> {
        let mut state = self.state.lock();
        state.kickoffs.push(MockKickoff {
            operation_id: operation_id.to_string(),
            feature_ids: features.iter().map(|f| f.id.clone()).collect(),
        });
        if let Some(error) = state.kickoff_failures.pop_front() {
            return Err(error);
        }
        if let Some(message) = state.kickoff_rejections.pop_front() {
            return Ok(KickoffResponse {
                operation_id: operation_id.to_string(),
                error: Some(message),
            });
        }
        Ok(KickoffResponse::accepted(operation_id))
    }
}

#[async_trait]
impl FeatureExecutor for MockFeatureExecutor {
    async fn start_feature_work(
        &self,
        features: &[FeatureSpec],
        operation_id: &str,
    ) -> Result<KickoffResponse, DownstreamError> {
        self.record_kickoff(operation_id, features)
    }

    async fn get_cultivation_status(&self, _operation_id: &str) -> Result<CultivationStatus, DownstreamError> {
        let (delay, panic) = {
            let state = self.state.lock();
            (state.status_delay, state.panic_on_status)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panic {
            panic!("status endpoint exploded");
        }

        let mut state = self.state.lock();
        state.status_calls += 1;
        match state.statuses.pop_front() {
            Some(answer) => answer,
            None => Ok(state
                .idle_status
                .clone()
                .unwrap_or_else(|| CultivationStatus::in_progress(Vec::new(), 0.0))),
        }
    }

    async fn get_feature_status(&self, feature_id: &str) -> Result<FeatureStatus, DownstreamError> {
        let state = self.state.lock();
        Ok(FeatureStatus {
            feature_id: feature_id.to_string(),
            feature_name: String::new(),
            implementation: state.artifacts.get(feature_id).cloned(),
            extra: Default::default(),
        })
    }

    async fn retry_feature(
        &self,
        feature_id: &str,
        _feature: &FeatureSpec,
        _component_id: &str,
    ) -> Result<FeatureRetryResponse, DownstreamError> {
        let mut state = self.state.lock();
        state.retried_features.push(feature_id.to_string());
        let failure = state
            .retry_outcomes
            .get_mut(feature_id)
            .and_then(VecDeque::pop_front)
            .flatten();
        Ok(match failure {
            None => FeatureRetryResponse::success(),
            Some(message) => FeatureRetryResponse::failed(message),
        })
    }
}

/// Coordinator that records nested kickoff requests and forwards them to the mock executor
#[derive(Debug, Clone, Default)]
pub struct RecordingCoordinator {
    executor: MockFeatureExecutor,
    requests: Arc<Mutex<Vec<NestedExecutionRequest>>>,
}

impl RecordingCoordinator {
    pub fn new(executor: MockFeatureExecutor) -> Self {
        Self {
            executor,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<NestedExecutionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NestedExecutionCoordinator for RecordingCoordinator {
    async fn coordinate_nested_execution(
        &self,
        request: NestedExecutionRequest,
    ) -> Result<KickoffResponse, DownstreamError> {
        let response = self
            .executor
            .record_kickoff(&request.operation_id, &request.features);
        self.requests.lock().push(request);
        response
    }
}
