//! Core E2E testing framework

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Per-scenario timeout in seconds
    pub timeout_secs: u64,
    /// How long a scenario waits for a single notification
    pub notification_wait_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            notification_wait_ms: 3000,
        }
    }
}

impl TestConfig {
    pub fn notification_wait(&self) -> Duration {
        Duration::from_millis(self.notification_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_name: String,
    pub success: bool,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Notifications the scenario observed
    pub notifications: usize,
}

/// Test scenario trait
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    /// Run the scenario, returning the number of notifications observed
    async fn execute(&self, config: &TestConfig) -> Result<usize>;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
}

pub struct TestFramework {
    config: TestConfig,
}

impl TestFramework {
    pub fn new(config: TestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub async fn run_scenario<S: TestScenario + ?Sized>(&self, scenario: &S) -> TestResult {
        info!("Starting test scenario: {}", scenario.name());
        info!("Description: {}", scenario.description());
        let start_time = Instant::now();

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = tokio::time::timeout(timeout, scenario.execute(&self.config)).await;

        let (success, error_message, notifications) = match outcome {
            Ok(Ok(count)) => (true, None, count),
            Ok(Err(e)) => (false, Some(format!("{:#}", e)), 0),
            Err(_) => (false, Some(format!("timed out after {:?}", timeout)), 0),
        };

        let result = TestResult {
            scenario_name: scenario.name().to_string(),
            success,
            duration: start_time.elapsed(),
            error_message,
            notifications,
        };

        if result.success {
            info!(
                "Scenario {} passed in {:?} ({} notifications)",
                result.scenario_name, result.duration, result.notifications
            );
        } else {
            error!(
                "Scenario {} failed: {}",
                result.scenario_name,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }
}
