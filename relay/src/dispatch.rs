//! Fan-out dispatcher - runs every resolved target of one inbound event.
//!
//! Each target gets its own task performing filter evaluation and then sink
//! dispatch, each under its own deadline and under the inbound request's
//! cancellation token. The dispatcher waits for every task before returning:
//! no target's failure cuts the others short.
//!
//! ```text
//! targets ─┬─ task: filter (2s) → sink (10s) ─┐
//!          ├─ task: filter (2s) → sink (10s) ─┼─ join all → Vec<DispatchOutcome>
//!          └─ task: filter (2s) → sink (10s) ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::filter::{FilterError, FilterEvaluator};
use crate::routing::EndpointTarget;
use crate::sink::{OutgoingRequest, SinkError, SinkRegistry};

/// Why one target's dispatch failed.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("filter evaluation timed out after {0:?}")]
    FilterTimeout(Duration),
    #[error("filter evaluation failed: {0}")]
    Filter(#[from] FilterError),
    #[error("sink dispatch timed out after {0:?}")]
    SinkTimeout(Duration),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("dispatch task panicked: {0}")]
    Panicked(String),
}

/// Result of one target's filter + sink run.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub target: EndpointTarget,
    pub result: Result<(), DispatchError>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Evaluate `filter` under `deadline`, giving up early if `cancel` fires.
pub async fn evaluate_with_deadline(
    evaluator: &dyn FilterEvaluator,
    payload: &[u8],
    filter: &str,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, DispatchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        result = timeout(deadline, evaluator.evaluate(payload, filter)) => match result {
            Ok(value) => Ok(value?),
            Err(_) => Err(DispatchError::FilterTimeout(deadline)),
        },
    }
}

/// Concurrent per-target executor.
#[derive(Clone)]
pub struct FanOutDispatcher {
    evaluator: Arc<dyn FilterEvaluator>,
    sinks: Arc<SinkRegistry>,
    filter_timeout: Duration,
    sink_timeout: Duration,
}

impl FanOutDispatcher {
    pub fn new(
        evaluator: Arc<dyn FilterEvaluator>,
        sinks: SinkRegistry,
        filter_timeout: Duration,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            evaluator,
            sinks: Arc::new(sinks),
            filter_timeout,
            sink_timeout,
        }
    }

    /// Run every target and return one outcome per target, in target order.
    ///
    /// Returns only after all targets have finished, failed, or been cancelled.
    pub async fn dispatch(
        &self,
        payload: Bytes,
        targets: Vec<EndpointTarget>,
        cancel: &CancellationToken,
    ) -> Vec<DispatchOutcome> {
        let expected = targets.len();

        let (targets, handles): (Vec<_>, Vec<_>) = targets
            .into_iter()
            .map(|target| {
                let this = self.clone();
                let payload = payload.clone();
                let cancel = cancel.child_token();
                let task_target = target.clone();
                let span = tracing::info_span!(
                    "dispatch_target",
                    kind = %target.kind,
                    target = %target.target,
                );

                let handle = tokio::spawn(
                    async move { this.run_target(&payload, &task_target, &cancel).await }
                        .instrument(span),
                );
                (target, handle)
            })
            .unzip();

        let results = join_all(handles).await;

        let outcomes: Vec<DispatchOutcome> = targets
            .into_iter()
            .zip(results)
            .map(|(target, joined)| {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(DispatchError::Panicked(e.to_string())),
                    Err(_) => Err(DispatchError::Cancelled),
                };

                if let Err(e) = &result {
                    warn!(
                        address = %target.address,
                        kind = %target.kind,
                        target = %target.target,
                        filter = %target.filter,
                        error = %e,
                        "dispatch_target_failed"
                    );
                }
                DispatchOutcome { target, result }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            targets = expected,
            succeeded = expected - failed,
            failed = failed,
            "dispatch_complete"
        );

        outcomes
    }

    async fn run_target(
        &self,
        payload: &[u8],
        target: &EndpointTarget,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let value = evaluate_with_deadline(
            self.evaluator.as_ref(),
            payload,
            &target.filter,
            self.filter_timeout,
            cancel,
        )
        .await?;

        debug!(
            data = %String::from_utf8_lossy(&value),
            "dispatching"
        );

        let request = OutgoingRequest::new(self.sink_timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = timeout(self.sink_timeout, self.sinks.dispatch(&request, &value, target)) => {
                match result {
                    Ok(sent) => Ok(sent?),
                    Err(_) => Err(DispatchError::SinkTimeout(self.sink_timeout)),
                }
            }
        }
    }
}
