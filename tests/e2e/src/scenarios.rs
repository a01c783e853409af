//! Routing table scenarios

use crate::fixtures::{RouteEntry, RouteKey, RouteTable, ROUTES_CHAIN};
use crate::framework::{TestConfig, TestScenario};
use anyhow::{anyhow, ensure, Context, Result};
use notif_chain::{
    subscribe_by_callback, udp_notification_listener, NotifChainDb, NotifChainElem, Notification, Opcode, Publisher,
    PublisherSettings, RemoteSubscriber,
};
use notif_network::UdpConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

async fn next_notification(rx: &mut UnboundedReceiver<Notification>, wait: Duration) -> Result<Notification> {
    tokio::time::timeout(wait, rx.recv())
        .await
        .map_err(|_| anyhow!("no notification within {:?}", wait))?
        .context("notification channel closed")
}

async fn wait_for_subscriptions(db: &NotifChainDb, count: usize, wait: Duration) -> Result<()> {
    tokio::time::timeout(wait, async {
        while db.lookup(ROUTES_CHAIN).map(|chain| chain.len()).unwrap_or(0) != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("publisher did not reach {} subscriptions", count))
}

fn expect(notification: &Notification, opcode: Opcode, key: RouteKey) -> Result<()> {
    ensure!(
        notification.opcode == opcode,
        "expected {} got {}",
        opcode,
        notification.opcode
    );
    let got = notification.key.as_deref().and_then(RouteKey::from_bytes);
    ensure!(got == Some(key), "expected key {} got {:?}", key, got);
    Ok(())
}

/// Two in-process subscribers on different routes; only the matching one
/// hears the update
pub struct LocalCallbackScenario;

#[async_trait::async_trait]
impl TestScenario for LocalCallbackScenario {
    async fn execute(&self, config: &TestConfig) -> Result<usize> {
        let db = Arc::new(NotifChainDb::new());
        let _table = RouteTable::new(db.clone())?;

        let key_a = RouteKey::parse("10.0.0.1/32")?;
        let key_b = RouteKey::parse("10.0.0.2/32")?;

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        subscribe_by_callback(&db, ROUTES_CHAIN, 1, Some(&key_a.to_bytes()), move |n| {
            let _ = tx_a.send(n.clone());
        })?;
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<Notification>();
        subscribe_by_callback(&db, ROUTES_CHAIN, 2, Some(&key_b.to_bytes()), move |n| {
            let _ = tx_b.send(n.clone());
        })?;

        let event = NotifChainElem::event(Opcode::Update, Some(&key_a.to_bytes()), Some(b"UPDATED"));
        let report = db.invoke(ROUTES_CHAIN, Some(&event)).await?;
        ensure!(report.matched == 1, "expected one match, got {:?}", report);

        let notification = next_notification(&mut rx_a, config.notification_wait()).await?;
        expect(&notification, Opcode::Update, key_a)?;
        ensure!(
            notification.payload.as_deref() == Some(&b"UPDATED"[..]),
            "unexpected payload {:?}",
            notification.payload
        );
        ensure!(rx_b.try_recv().is_err(), "subscriber B was notified for A's route");

        info!("{}", db.dump());
        Ok(1)
    }

    fn name(&self) -> &str {
        "local_callbacks"
    }

    fn description(&self) -> &str {
        "Callback subscribers receive only the routes they registered for"
    }
}

/// A TCP subscriber follows one route through create, update and delete
pub struct RemoteTcpScenario;

#[async_trait::async_trait]
impl TestScenario for RemoteTcpScenario {
    async fn execute(&self, config: &TestConfig) -> Result<usize> {
        let wait = config.notification_wait();
        let db = Arc::new(NotifChainDb::new());
        let table = RouteTable::new(db.clone())?;
        let publisher = Publisher::start(db.clone(), &PublisherSettings::loopback()).await?;
        let tcp = publisher.tcp_addr().context("publisher has no TCP listener")?;

        let key = RouteKey::parse("192.168.10.0/24")?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscriber = RemoteSubscriber::tcp(100, tcp).await?;
        subscriber.listen_for_notifications(move |n| {
            let _ = tx.send(n);
        })?;
        subscriber.subscribe_tcp(ROUTES_CHAIN, Some(&key.to_bytes())).await?;
        wait_for_subscriptions(&db, 1, wait).await?;

        table
            .add(RouteEntry::new(key, Ipv4Addr::new(192, 168, 10, 1), "eth0"))
            .await?;
        expect(&next_notification(&mut rx, wait).await?, Opcode::Create, key)?;

        // unrelated route stays silent
        let other = RouteKey::parse("172.16.0.0/16")?;
        let report = table
            .add(RouteEntry::new(other, Ipv4Addr::new(172, 16, 0, 1), "eth1"))
            .await?;
        ensure!(report.matched == 0, "unrelated route matched {:?}", report);

        table.update(key, Ipv4Addr::new(192, 168, 10, 254), "eth2").await?;
        let updated = next_notification(&mut rx, wait).await?;
        expect(&updated, Opcode::Update, key)?;
        ensure!(
            updated.payload.as_deref() == Some(&b"gw=192.168.10.254 oif=eth2"[..]),
            "unexpected payload {:?}",
            updated.payload
        );

        table.delete(key).await?;
        expect(&next_notification(&mut rx, wait).await?, Opcode::Delete, key)?;

        subscriber.unsubscribe_tcp(ROUTES_CHAIN, Some(&key.to_bytes())).await?;
        wait_for_subscriptions(&db, 0, wait).await?;

        subscriber.disconnect().await?;
        publisher.shutdown().await?;
        Ok(3)
    }

    fn name(&self) -> &str {
        "remote_tcp"
    }

    fn description(&self) -> &str {
        "TCP subscriber is notified of create, update and delete on its connection"
    }
}

/// A late UDP subscriber asks for the whole table and gets every route
pub struct RemoteUdpReplayScenario;

#[async_trait::async_trait]
impl TestScenario for RemoteUdpReplayScenario {
    async fn execute(&self, config: &TestConfig) -> Result<usize> {
        let wait = config.notification_wait();
        let db = Arc::new(NotifChainDb::new());
        let table = RouteTable::new(db.clone())?;
        let routes = [
            RouteEntry::new(RouteKey::parse("10.1.0.0/16")?, Ipv4Addr::new(10, 1, 0, 1), "eth0"),
            RouteEntry::new(RouteKey::parse("10.2.0.0/16")?, Ipv4Addr::new(10, 2, 0, 1), "eth1"),
        ];
        for route in &routes {
            table.add(route.clone()).await?;
        }

        let publisher =
            Publisher::start_with_replay(db.clone(), &PublisherSettings::loopback(), table.replay_handler()).await?;
        let udp = publisher.udp_addr().context("publisher has no UDP listener")?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = udp_notification_listener(
            &UdpConfig {
                bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
                ..Default::default()
            },
            move |n| {
                let _ = tx.send(n);
            },
        )
        .await?;
        let SocketAddr::V4(notify) = listener.local_addr() else {
            return Err(anyhow!("listener bound to a non-IPv4 address"));
        };

        let subscriber = RemoteSubscriber::udp(200, udp);
        subscriber.subscribe_udp(ROUTES_CHAIN, None, notify).await?;
        wait_for_subscriptions(&db, 1, wait).await?;
        subscriber.request_notify_all(ROUTES_CHAIN).await?;

        let mut seen = Vec::new();
        for _ in &routes {
            let notification = next_notification(&mut rx, wait).await?;
            ensure!(notification.opcode == Opcode::Create, "replay must announce CREATE");
            seen.extend(notification.key.as_deref().and_then(RouteKey::from_bytes));
        }
        seen.sort();
        let expected: Vec<RouteKey> = routes.iter().map(|r| r.key).collect();
        ensure!(seen == expected, "replayed {:?}, expected {:?}", seen, expected);

        subscriber.unsubscribe_all(ROUTES_CHAIN).await?;
        wait_for_subscriptions(&db, 0, wait).await?;

        listener.shutdown().await?;
        publisher.shutdown().await?;
        Ok(seen.len())
    }

    fn name(&self) -> &str {
        "remote_udp_replay"
    }

    fn description(&self) -> &str {
        "NOTIFY_ALL from a UDP subscriber replays the routing table"
    }
}
