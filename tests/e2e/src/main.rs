//! End-to-End Test Runner for notification chains

use anyhow::Result;
use clap::Parser;
use notif_e2e_tests::{
    LocalCallbackScenario, RemoteTcpScenario, RemoteUdpReplayScenario, TestConfig, TestFramework, TestResult,
    TestScenario,
};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Test scenario to run (local, tcp, udp or all)
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Per-scenario timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Output results to file (TOML)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("notif_e2e_tests={}", log_level).parse()?)
                .add_directive(format!("notif_chain={}", log_level).parse()?)
                .add_directive(format!("notif_network={}", log_level).parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting notification chain E2E suite");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let scenarios: Vec<Box<dyn TestScenario>> = match args.scenario.as_str() {
        "local" => vec![Box::new(LocalCallbackScenario)],
        "tcp" => vec![Box::new(RemoteTcpScenario)],
        "udp" => vec![Box::new(RemoteUdpReplayScenario)],
        "all" => vec![
            Box::new(LocalCallbackScenario),
            Box::new(RemoteTcpScenario),
            Box::new(RemoteUdpReplayScenario),
        ],
        other => {
            error!("Unknown scenario: {}", other);
            return Ok(());
        }
    };

    let framework = TestFramework::new(TestConfig {
        timeout_secs: args.timeout,
        ..Default::default()
    });

    let mut results = Vec::new();
    for scenario in &scenarios {
        results.push(framework.run_scenario(scenario.as_ref()).await);
    }

    print_summary(&results);

    if let Some(path) = &args.output {
        #[derive(serde::Serialize)]
        struct Report<'a> {
            results: &'a [TestResult],
        }
        let report = toml::to_string_pretty(&Report { results: &results })?;
        std::fs::write(path, report)?;
        info!("Results written to {}", path.display());
    }

    if results.iter().any(|r| !r.success) {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.success).count();
    info!("==== {} / {} scenarios passed ====", passed, results.len());
    for result in results {
        let status = if result.success { "PASS" } else { "FAIL" };
        info!(
            "{} {:<20} {:>8.1?} {}",
            status,
            result.scenario_name,
            result.duration,
            result.error_message.as_deref().unwrap_or("")
        );
    }
}
