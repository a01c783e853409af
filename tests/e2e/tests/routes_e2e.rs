//! Routing table scenarios run as tests

use notif_e2e_tests::{
    LocalCallbackScenario, RemoteTcpScenario, RemoteUdpReplayScenario, TestConfig, TestFramework, TestScenario,
};

async fn run(scenario: &dyn TestScenario) {
    let framework = TestFramework::new(TestConfig::default());
    let result = framework.run_scenario(scenario).await;
    assert!(
        result.success,
        "{} failed: {:?}",
        result.scenario_name, result.error_message
    );
}

#[tokio::test]
async fn test_only_matching_callback_subscriber_is_updated() {
    run(&LocalCallbackScenario).await;
}

#[tokio::test]
async fn test_tcp_subscriber_follows_route_lifecycle() {
    run(&RemoteTcpScenario).await;
}

#[tokio::test]
async fn test_udp_subscriber_replays_table() {
    run(&RemoteUdpReplayScenario).await;
}
