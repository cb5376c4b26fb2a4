//! Prompt test runner
//!
//! Runs catalog cases against the live services through the tracked
//! invoker, so every test call shows up in the usage ledger like any other
//! AI call. A failing case never aborts a suite.

#[cfg(feature = "metrics")]
use casefile_observability::Metrics;

use casefile_core::{Clock, DocumentStore, Error, Invocation, Query, Result, ServiceKind, ServiceModels, Sort};
use casefile_usage::TrackedInvoker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cases::{PromptTestCase, PromptType, builtin_cases};
use crate::health::HealthReport;
use crate::results::{PromptTestResult, PromptTestSuite, preview};
use crate::validator;

/// Collection holding finished suites
pub const SUITES_COLLECTION: &str = "prompt_test_suites";

/// Suites returned by `history` when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRunnerConfig {
    /// Fraction of declared rules that must pass, in (0, 1]
    pub pass_threshold: f64,
    /// Suites considered by the health report
    pub health_window: usize,
    /// Session that test usage is recorded under
    pub session_id: String,
}

impl Default for TestRunnerConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.8,
            health_window: DEFAULT_HISTORY_LIMIT,
            session_id: "prompt-tests".to_string(),
        }
    }
}

impl TestRunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.pass_threshold > 0.0 && self.pass_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "prompt_tests.pass_threshold must be in (0, 1], got {}",
                self.pass_threshold
            )));
        }
        if self.health_window == 0 {
            return Err(Error::Config("prompt_tests.health_window must be at least 1".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::Config("prompt_tests.session_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Where a single test execution got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    PromptBuilt,
    ResponseReceived,
    UsageLogged,
    Validated,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::PromptBuilt => "prompt_built",
            RunStage::ResponseReceived => "response_received",
            RunStage::UsageLogged => "usage_logged",
            RunStage::Validated => "validated",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the stage of one execution for logging
struct Execution<'a> {
    case: &'a PromptTestCase,
    stage: RunStage,
}

impl<'a> Execution<'a> {
    fn new(case: &'a PromptTestCase) -> Self {
        Self {
            case,
            stage: RunStage::Init,
        }
    }

    fn advance(&mut self, stage: RunStage) {
        debug!(test_case = %self.case.id, from = %self.stage, to = %stage, "Prompt test stage");
        self.stage = stage;
    }

    fn fail(&mut self, err: &Error) -> String {
        warn!(test_case = %self.case.id, stage = %self.stage, "Prompt test failed: {}", err);
        self.stage = RunStage::Failed;
        err.to_string()
    }
}

pub struct TestRunner {
    invoker: TrackedInvoker,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    models: ServiceModels,
    config: TestRunnerConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl TestRunner {
    pub fn new(
        invoker: TrackedInvoker,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        models: ServiceModels,
        config: TestRunnerConfig,
    ) -> Self {
        Self {
            invoker,
            store,
            clock,
            models,
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TestRunnerConfig {
        &self.config
    }

    /// The built-in test cases
    pub fn catalog(&self) -> &'static [PromptTestCase] {
        builtin_cases()
    }

    /// Run one case. Always produces a result; failures are captured in it.
    pub async fn run_single(&self, case: &PromptTestCase, session_id: &str) -> PromptTestResult {
        let started = Instant::now();
        let mut execution = Execution::new(case);
        let expects_json = case.prompt_type.expects_json();

        let mut result = PromptTestResult {
            id: Uuid::new_v4().to_string(),
            test_case_id: case.id.clone(),
            test_case_name: case.name.clone(),
            prompt_type: case.prompt_type,
            timestamp: self.clock.now(),
            success: false,
            execution_time: 0.0,
            response_received: false,
            json_parse_success: false,
            validation_passed: false,
            token_count: 0,
            estimated_cost: 0.0,
            error_message: None,
            response_preview: String::new(),
            detailed_results: Default::default(),
        };

        let (system, user) = match case.build_prompt() {
            Ok(prompt) => prompt,
            Err(err) => {
                result.error_message = Some(execution.fail(&err));
                result.execution_time = started.elapsed().as_secs_f64();
                self.record_result(&result);
                return result;
            }
        };
        execution.advance(RunStage::PromptBuilt);

        let invocation = Invocation::new(case.service, self.models.model_for(case.service), system, user);
        let operation = format!("prompt_test_{}", case.prompt_type);
        let reply = self.invoker.call(session_id, None, &operation, &invocation).await;

        result.token_count = reply.record.total_token_estimate;
        result.estimated_cost = reply.record.estimated_cost;

        match reply.outcome {
            Ok(response) => {
                execution.advance(RunStage::ResponseReceived);
                execution.advance(RunStage::UsageLogged);
                result.response_received = true;
                result.response_preview = preview(&response);

                let detailed = validator::validate(case, &response);
                execution.advance(RunStage::Validated);

                result.json_parse_success = if expects_json {
                    detailed.get("response_is_json").copied().unwrap_or(false)
                } else {
                    true
                };
                result.validation_passed = validator::passes_threshold(case, &detailed, self.config.pass_threshold);
                result.detailed_results = detailed;
                result.success = result.response_received && result.json_parse_success && result.validation_passed;
                execution.advance(RunStage::Done);
            }
            Err(err) => {
                result.error_message = Some(execution.fail(&err));
                result.json_parse_success = !expects_json;
            }
        }

        result.execution_time = started.elapsed().as_secs_f64();
        self.record_result(&result);
        result
    }

    fn record_result(&self, result: &PromptTestResult) {
        info!(
            test_case = %result.test_case_id,
            success = result.success,
            tokens = result.token_count,
            "Prompt test {} in {:.2}s",
            if result.success { "passed" } else { "failed" },
            result.execution_time
        );
        #[cfg(feature = "metrics")]
        if let Some(ref metrics) = self.metrics {
            metrics.record_prompt_test(result.prompt_type.as_str(), result.success);
        }
    }

    /// Run the catalog, optionally only some prompt types, and persist the suite.
    ///
    /// Persistence failures are logged; the suite is returned regardless.
    pub async fn run_suite(&self, session_id: &str, prompt_types: Option<&[PromptType]>) -> PromptTestSuite {
        let selected = self
            .catalog()
            .iter()
            .filter(|case| prompt_types.is_none_or(|types| types.contains(&case.prompt_type)));

        let mut results = Vec::new();
        for case in selected {
            results.push(self.run_single(case, session_id).await);
        }

        let now = self.clock.now();
        let suite = PromptTestSuite::from_results(
            format!("Prompt Test Suite - {}", now.format("%Y-%m-%d %H:%M:%S")),
            now,
            results,
        );

        info!(
            suite_id = %suite.id,
            tests_run = suite.tests_run,
            tests_passed = suite.tests_passed,
            "Prompt test suite finished: {:.1}% success, ${:.4}",
            suite.success_rate,
            suite.total_cost
        );
        #[cfg(feature = "metrics")]
        if let Some(ref metrics) = self.metrics {
            metrics.record_suite(suite.success_rate);
        }

        if let Err(err) = self.store.insert_as(SUITES_COLLECTION, &suite).await {
            error!(suite_id = %suite.id, "Failed to persist prompt test suite: {}", err);
        }

        suite
    }

    /// Most recent suites, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<PromptTestSuite>> {
        let query = Query::all().sort(Sort::newest_first("timestamp")).limit(limit);
        self.store.find_as(SUITES_COLLECTION, &query).await
    }

    /// Send a caller-supplied prompt through the pipeline with the rules of its type
    pub async fn validate_single_prompt(
        &self,
        prompt_type: PromptType,
        prompt_text: &str,
        service: Option<ServiceKind>,
    ) -> Result<PromptTestResult> {
        if prompt_text.trim().is_empty() {
            return Err(Error::InvalidRequest("prompt_text must not be empty".to_string()));
        }
        let case = PromptTestCase::custom(prompt_type, prompt_text, service);
        Ok(self.run_single(&case, &self.config.session_id).await)
    }

    /// Health over the configured window of recent suites
    pub async fn health_report(&self) -> Result<HealthReport> {
        let suites = self.history(self.config.health_window).await?;
        Ok(HealthReport::from_suites(&suites, self.clock.now()))
    }
}
