//! Casefile prompt tests
//!
//! Automated validation of the game's prompts against the live AI services:
//! - `cases`: the built-in test case catalog and ad-hoc cases
//! - `rules`: validation predicates keyed by prompt type
//! - `validator`: evaluates a case's rules against a response
//! - `runner`: executes cases and suites, records usage, persists suites
//! - `health`: trend report over recent suites

pub mod cases;
pub mod health;
pub mod results;
pub mod rules;
pub mod runner;
pub mod validator;

pub use cases::{CaseFixture, FixtureCheck, PromptTestCase, PromptType, ResponseFormat, TestInput, builtin_cases};
pub use health::{HealthBand, HealthReport, PromptTypeHealth, TestCaseHealth};
pub use results::{PromptTestResult, PromptTestSuite, SuiteSummary};
pub use rules::RuleContext;
pub use runner::{DEFAULT_HISTORY_LIMIT, RunStage, SUITES_COLLECTION, TestRunner, TestRunnerConfig};
pub use validator::validate;
