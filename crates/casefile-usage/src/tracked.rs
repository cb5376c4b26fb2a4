//! AI invocation with usage accounting
//!
//! Every call made through `TrackedInvoker` lands in the usage ledger,
//! whether the upstream service answered or not.

use casefile_core::{AiInvoker, Invocation, Result};
use std::sync::Arc;

#[cfg(feature = "metrics")]
use casefile_observability::Metrics;
#[cfg(feature = "metrics")]
use std::time::Instant;

use crate::ledger::{UsageEvent, UsageLedger, UsageRecord};

/// Outcome of a tracked call
#[derive(Debug)]
pub struct TrackedReply {
    /// Reply text, or the upstream failure
    pub outcome: Result<String>,
    /// Usage record written for the call
    pub record: UsageRecord,
}

/// Wraps an `AiInvoker` so each call is recorded in the ledger
#[derive(Clone)]
pub struct TrackedInvoker {
    invoker: Arc<dyn AiInvoker>,
    ledger: Arc<UsageLedger>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl TrackedInvoker {
    pub fn new(invoker: Arc<dyn AiInvoker>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            invoker,
            ledger,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Attach a metrics collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Invoke and record usage under `operation`
    pub async fn call(
        &self,
        session_id: &str,
        case_id: Option<&str>,
        operation: &str,
        invocation: &Invocation,
    ) -> TrackedReply {
        #[cfg(feature = "metrics")]
        let started = Instant::now();
        let outcome = self.invoker.invoke(invocation).await;

        #[cfg(feature = "metrics")]
        if let Some(ref metrics) = self.metrics {
            metrics.record_ai_latency(invocation.service.as_str(), started.elapsed().as_secs_f64());
        }

        // Non-text services are billed per unit; their prompt and reply stay empty in the record
        let text = invocation.service.is_text();
        let mut event = UsageEvent::new(session_id, invocation.service, operation).model(invocation.model.as_str());
        if text {
            event = event.prompt(invocation.user_prompt.as_str());
        }
        if let Some(case_id) = case_id {
            event = event.case_id(case_id);
        }
        event = match &outcome {
            Ok(response) if text => event.response(response.as_str()),
            Ok(_) => event,
            Err(err) => event.failed(err.to_string()),
        };

        let record = self.ledger.record(event).await;
        TrackedReply { outcome, record }
    }

    /// Invoke, record usage and return only the reply
    pub async fn invoke(
        &self,
        session_id: &str,
        case_id: Option<&str>,
        operation: &str,
        invocation: &Invocation,
    ) -> Result<String> {
        self.call(session_id, case_id, operation, invocation).await.outcome
    }
}
