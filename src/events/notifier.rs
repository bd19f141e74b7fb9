//! # Event Notifier
//!
//! Publishes delegation lifecycle events. Each emission is persisted as the
//! delegation's latest event, appended to bounded in-memory history, fanned
//! out on a broadcast channel and then delivered to the handlers subscribed
//! to its kind, in subscription order. A failing or panicking handler is
//! logged and never affects other handlers or the emitter.

use crate::config::EventsConfig;
use crate::constants::{keys, metrics as metric_names, DOWNSTREAM_TARGET};
use crate::events::types::{
    DelegationEvent, EventContext, EventKind, EventPayload, FailureReport, FeatureSummary,
    ProgressUpdate, RetryNotice,
};
use crate::metrics::{emit_metric, MetricsSink};
use crate::models::FeatureSpec;
use crate::state::{StateStore, StateStoreExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Receives events of the kinds it is subscribed to
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DelegationEvent) -> anyhow::Result<()>;
}

/// Adapter for synchronous closures
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&DelegationEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &DelegationEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Async callback taking an owned event
pub type EventCallback =
    Arc<dyn Fn(DelegationEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct CallbackHandler(EventCallback);

#[async_trait]
impl EventHandler for CallbackHandler {
    async fn handle(&self, event: &DelegationEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerList = Vec<(SubscriptionId, Arc<dyn EventHandler>)>;

pub struct EventNotifier {
    subscribers: RwLock<HashMap<EventKind, HandlerList>>,
    next_subscription: AtomicU64,
    history: DashMap<String, Vec<DelegationEvent>>,
    start_times: DashMap<String, DateTime<Utc>>,
    broadcast: broadcast::Sender<DelegationEvent>,
    store: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsSink>,
    config: EventsConfig,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("tracked_delegations", &self.history.len())
            .field("config", &self.config)
            .finish()
    }
}

impl EventNotifier {
    pub fn new(
        store: Arc<dyn StateStore>,
        metrics: Arc<dyn MetricsSink>,
        config: EventsConfig,
    ) -> Self {
        let (broadcast, _) = broadcast::channel(config.history_limit.max(16));
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            history: DashMap::new(),
            start_times: DashMap::new(),
            broadcast,
            store,
            metrics,
            config,
        }
    }

    /// Registers a handler for one event kind
    #[instrument(skip(self, handler))]
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write();
        let handlers = subscribers.entry(kind).or_default();
        handlers.push((id, handler));
        info!(
            event_kind = %kind,
            subscriber_count = handlers.len(),
            "Event subscriber registered"
        );
        id
    }

    pub fn subscribe_fn<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DelegationEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(FnHandler(handler)))
    }

    pub fn subscribe_callback(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.subscribe(kind, Arc::new(CallbackHandler(callback)))
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(handlers) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if removed {
            debug!(event_kind = %kind, "Event subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Stream of every event regardless of kind
    pub fn subscribe_all(&self) -> broadcast::Receiver<DelegationEvent> {
        self.broadcast.subscribe()
    }

    /// Events emitted for a delegation, oldest first
    pub fn get_event_history(&self, delegation_id: &str) -> Vec<DelegationEvent> {
        self.history
            .get(delegation_id)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, delegation_id: &str) {
        self.history.remove(delegation_id);
        self.start_times.remove(delegation_id);
    }

    /// Drops the in-memory history and every event record persisted for a
    /// delegation that has been cleaned up
    pub async fn forget_delegation(&self, delegation_id: &str) {
        self.clear_history(delegation_id);
        let stored = match self
            .store
            .list_keys_by_prefix(&keys::delegation_keys(delegation_id))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(delegation_id = %delegation_id, error = %e, "Failed to list event records");
                return;
            }
        };
        for key in stored {
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete event record");
            }
        }
        debug!(delegation_id = %delegation_id, "Forgot delegation events");
    }

    /// Most recent persisted event for a delegation
    pub async fn get_latest_event(&self, delegation_id: &str) -> Option<DelegationEvent> {
        match self
            .store
            .get_typed(&keys::delegation_latest_event(delegation_id))
            .await
        {
            Ok(event) => event,
            Err(e) => {
                warn!(delegation_id = %delegation_id, error = %e, "Failed to read latest event");
                None
            }
        }
    }

    /// Seconds since the delegation's Initiated event, or 0 when unknown
    pub async fn execution_time_seconds(&self, delegation_id: &str) -> f64 {
        let start = match self.start_times.get(delegation_id) {
            Some(start) => Some(*start),
            None => self
                .store
                .get_typed::<DateTime<Utc>>(&keys::delegation_start_time(delegation_id))
                .await
                .ok()
                .flatten(),
        };
        start.map_or(0.0, |start| {
            (Utc::now() - start).num_milliseconds().max(0) as f64 / 1000.0
        })
    }

    pub async fn emit_initiated(
        &self,
        context: &EventContext,
        features: &[FeatureSpec],
        expected_completion_time: Option<DateTime<Utc>>,
    ) -> DelegationEvent {
        let now = Utc::now();
        self.start_times.insert(context.delegation_id.clone(), now);
        if let Err(e) = self
            .store
            .set_typed(&keys::delegation_start_time(&context.delegation_id), &now)
            .await
        {
            warn!(delegation_id = %context.delegation_id, error = %e, "Failed to persist start time");
        }

        let payload = EventPayload::Initiated {
            feature_count: features.len(),
            features: features
                .iter()
                .map(|feature| FeatureSummary {
                    id: feature.id.clone(),
                    name: feature.name.clone(),
                })
                .collect(),
            delegated_to: DOWNSTREAM_TARGET.to_string(),
            expected_completion_time,
        };
        self.emit(DelegationEvent::new(context, payload)).await
    }

    pub async fn emit_progress(&self, context: &EventContext, update: ProgressUpdate) -> DelegationEvent {
        let payload = EventPayload::Progress {
            progress_percentage: update.progress_percentage,
            completed_features: update.completed_features,
            pending_features: update.pending_features,
            status_message: update.status_message,
        };
        self.emit(DelegationEvent::new(context, payload)).await
    }

    pub async fn emit_completed(
        &self,
        context: &EventContext,
        completed_features: Vec<String>,
        result_summary: Value,
    ) -> DelegationEvent {
        let payload = EventPayload::Completed {
            completed_features,
            execution_time_seconds: self.execution_time_seconds(&context.delegation_id).await,
            result_summary,
        };
        self.emit(DelegationEvent::new(context, payload)).await
    }

    pub async fn emit_failed(&self, context: &EventContext, report: FailureReport) -> DelegationEvent {
        let payload = EventPayload::Failed {
            error_type: report.error_type,
            error_message: report.error_message,
            failed_features: report.failed_features,
            completed_features: report.completed_features,
            execution_time_seconds: self.execution_time_seconds(&context.delegation_id).await,
            recovery_attempted: report.recovery_attempted,
            recovery_succeeded: report.recovery_succeeded,
        };
        self.emit(DelegationEvent::new(context, payload)).await
    }

    pub async fn emit_cancelled(
        &self,
        context: &EventContext,
        reason: &str,
        cancelled_features: Vec<String>,
        completed_features: Vec<String>,
    ) -> DelegationEvent {
        let payload = EventPayload::Cancelled {
            reason: reason.to_string(),
            cancelled_features,
            completed_features,
            execution_time_seconds: self.execution_time_seconds(&context.delegation_id).await,
        };
        self.emit(DelegationEvent::new(context, payload)).await
    }

    pub async fn emit_retry(&self, context: &EventContext, notice: RetryNotice) -> DelegationEvent {
        let retry_key = keys::delegation_retry(&context.delegation_id, notice.retry_count);
        let payload = EventPayload::Retry {
            retry_count: notice.retry_count,
            error_type: notice.error_type,
            error_message: notice.error_message,
            retry_features: notice.retry_features,
            retry_strategy: notice.retry_strategy,
            next_retry_time: notice.next_retry_time,
        };
        let event = DelegationEvent::new(context, payload);
        if let Err(e) = self.store.set_typed(&retry_key, &event).await {
            warn!(key = %retry_key, error = %e, "Failed to persist retry record");
        }
        self.emit(event).await
    }

    async fn emit(&self, event: DelegationEvent) -> DelegationEvent {
        let kind = event.kind();
        self.persist(&event).await;
        self.append_history(&event);

        emit_metric(
            self.metrics.as_ref(),
            metric_names::EVENT_EMITTED,
            1.0,
            json!({
                "event_type": kind.as_str(),
                "delegation_id": event.delegation_id,
                "component_id": event.component_id,
            }),
        );
        debug!(
            event_type = %kind,
            delegation_id = %event.delegation_id,
            "📡 Delegation event emitted"
        );

        // No receivers is not an error
        let _ = self.broadcast.send(event.clone());

        let handlers: HandlerList = self
            .subscribers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        for (id, handler) in handlers {
            match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    event_type = %kind,
                    subscription = id.0,
                    delegation_id = %event.delegation_id,
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => error!(
                    event_type = %kind,
                    subscription = id.0,
                    delegation_id = %event.delegation_id,
                    "Event handler panicked"
                ),
            }
        }
        event
    }

    async fn persist(&self, event: &DelegationEvent) {
        if let Err(e) = self
            .store
            .set_typed(&keys::delegation_latest_event(&event.delegation_id), event)
            .await
        {
            warn!(delegation_id = %event.delegation_id, error = %e, "Failed to persist latest event");
        }
        let pointer = json!({
            "delegation_id": event.delegation_id,
            "last_event_type": event.kind().as_str(),
            "last_update": event.timestamp,
        });
        if let Err(e) = self
            .store
            .set(&keys::component_delegation_status(&event.component_id), pointer)
            .await
        {
            warn!(component_id = %event.component_id, error = %e, "Failed to persist component event pointer");
        }
    }

    fn append_history(&self, event: &DelegationEvent) {
        let mut events = self.history.entry(event.delegation_id.clone()).or_default();
        events.push(event.clone());
        let limit = self.config.history_limit.max(1);
        if events.len() > limit {
            let excess = events.len() - limit;
            events.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetricsSink;
    use crate::orchestration::error_classifier::DelegationErrorType;
    use crate::state::InMemoryStateStore;
    use parking_lot::Mutex;

    fn notifier_with(limit: usize) -> (EventNotifier, Arc<InMemoryStateStore>, RecordingMetricsSink) {
        let store = Arc::new(InMemoryStateStore::new());
        let metrics = RecordingMetricsSink::new();
        let notifier = EventNotifier::new(
            store.clone(),
            Arc::new(metrics.clone()),
            EventsConfig { history_limit: limit },
        );
        (notifier, store, metrics)
    }

    fn context() -> EventContext {
        EventContext::new("d1", "c1")
    }

    #[tokio::test]
    async fn test_handlers_run_in_subscription_order() {
        let (notifier, _, _) = notifier_with(10);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = seen.clone();
            notifier.subscribe_fn(EventKind::Completed, move |_| {
                seen.lock().push(label);
                Ok(())
            });
        }
        notifier.emit_completed(&context(), vec!["f1".into()], json!({})).await;

        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let (notifier, _, _) = notifier_with(10);
        let calls = Arc::new(AtomicU64::new(0));

        notifier.subscribe_fn(EventKind::Failed, |_| anyhow::bail!("handler error"));
        notifier.subscribe_fn(EventKind::Failed, |_| panic!("handler panic"));
        let counter = calls.clone();
        notifier.subscribe_fn(EventKind::Failed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let event = notifier
            .emit_failed(&context(), FailureReport::new(DelegationErrorType::Timeout, "slow"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.kind(), EventKind::Failed);
    }

    #[tokio::test]
    async fn test_handlers_only_receive_their_kind() {
        let (notifier, _, _) = notifier_with(10);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        notifier.subscribe_fn(EventKind::Cancelled, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        notifier
            .emit_progress(&context(), ProgressUpdate::default())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let (notifier, _, _) = notifier_with(10);
        let id = notifier.subscribe_fn(EventKind::Retry, |_| Ok(()));
        assert_eq!(notifier.subscriber_count(EventKind::Retry), 1);
        assert!(notifier.unsubscribe(EventKind::Retry, id));
        assert!(!notifier.unsubscribe(EventKind::Retry, id));
        assert_eq!(notifier.subscriber_count(EventKind::Retry), 0);
    }

    #[tokio::test]
    async fn test_callback_handler_receives_owned_event() {
        let (notifier, _, _) = notifier_with(10);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        notifier.subscribe_callback(
            EventKind::Initiated,
            Arc::new(move |event: DelegationEvent| {
                let sink = sink.clone();
                async move {
                    *sink.lock() = Some(event.delegation_id);
                    Ok::<(), anyhow::Error>(())
                }
                .boxed()
            }),
        );

        let features = vec![FeatureSpec::new("f1", "Parse", "parses")];
        notifier.emit_initiated(&context(), &features, None).await;
        assert_eq!(seen.lock().as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn test_persistence_and_metrics() {
        let (notifier, store, metrics) = notifier_with(10);
        let features = vec![FeatureSpec::new("f1", "Parse", "parses")];
        notifier.emit_initiated(&context(), &features, None).await;

        let latest = notifier.get_latest_event("d1").await.expect("latest event");
        assert_eq!(latest.kind(), EventKind::Initiated);
        let pointer = store
            .get(&keys::component_delegation_status("c1"))
            .await
            .unwrap()
            .expect("component pointer");
        assert_eq!(pointer["delegation_id"], "d1");
        assert_eq!(pointer["last_event_type"], "delegation_initiated");
        assert!(store
            .get(&keys::delegation_start_time("d1"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(metrics.count(metric_names::EVENT_EMITTED), 1);
    }

    #[tokio::test]
    async fn test_retry_record_is_persisted() {
        let (notifier, store, _) = notifier_with(10);
        notifier
            .emit_retry(
                &context(),
                RetryNotice {
                    retry_count: 2,
                    error_type: DelegationErrorType::CommunicationError,
                    error_message: "reset".into(),
                    retry_features: vec!["f1".into()],
                    retry_strategy: "retry_all".into(),
                    next_retry_time: Utc::now(),
                },
            )
            .await;

        let record = store.get(&keys::delegation_retry("d1", 2)).await.unwrap();
        assert_eq!(record.expect("retry record")["retry_count"], 2);
    }

    #[tokio::test]
    async fn test_forget_delegation_drops_history_and_records() {
        let (notifier, store, _) = notifier_with(10);
        let features = vec![FeatureSpec::new("f1", "Parse", "parses")];
        notifier.emit_initiated(&context(), &features, None).await;
        notifier
            .emit_initiated(&EventContext::new("d10", "c1"), &features, None)
            .await;

        notifier.forget_delegation("d1").await;

        assert!(notifier.get_event_history("d1").is_empty());
        assert!(notifier.get_latest_event("d1").await.is_none());
        assert!(store.get(&keys::delegation_start_time("d1")).await.unwrap().is_none());
        assert_eq!(notifier.execution_time_seconds("d1").await, 0.0);
        assert_eq!(notifier.get_event_history("d10").len(), 1);
        assert!(notifier.get_latest_event("d10").await.is_some());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (notifier, _, _) = notifier_with(3);
        for i in 0..5 {
            notifier
                .emit_progress(
                    &context(),
                    ProgressUpdate {
                        progress_percentage: f64::from(i) * 10.0,
                        ..ProgressUpdate::default()
                    },
                )
                .await;
        }

        let history = notifier.get_event_history("d1");
        assert_eq!(history.len(), 3);
        match &history[0].payload {
            EventPayload::Progress { progress_percentage, .. } => {
                assert_eq!(*progress_percentage, 20.0)
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_receives_every_kind() {
        let (notifier, _, _) = notifier_with(10);
        let mut receiver = notifier.subscribe_all();
        notifier
            .emit_cancelled(&context(), "user", vec!["f1".into()], vec![])
            .await;
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::Cancelled);
    }

    #[tokio::test]
    async fn test_execution_time_uses_initiated_timestamp() {
        let (notifier, _, _) = notifier_with(10);
        assert_eq!(notifier.execution_time_seconds("d1").await, 0.0);
        notifier.emit_initiated(&context(), &[], None).await;
        assert!(notifier.execution_time_seconds("d1").await >= 0.0);
    }
}
