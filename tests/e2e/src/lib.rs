//! End-to-end scenarios for notification chains
//!
//! A routing table plays the publisher's data source: route changes invoke
//! the "routes" chain, keyed by destination prefix, and subscribers are
//! reached by in-process callbacks, UDP datagrams or their TCP connection.

pub mod fixtures;
pub mod framework;
pub mod scenarios;

pub use fixtures::{RouteEntry, RouteKey, RouteTable, ROUTES_CHAIN};
pub use framework::{TestConfig, TestFramework, TestResult, TestScenario};
pub use scenarios::{LocalCallbackScenario, RemoteTcpScenario, RemoteUdpReplayScenario};
