//! Routing table fixture
//!
//! Routes are keyed by (destination, mask), encoded as 5 bytes: the IPv4
//! address in network order followed by the mask length. The payload of a
//! notification is the route rendered as `gw=<gateway> oif=<interface>`.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use notif_chain::{InvokeReport, KeyComparator, KeyPrinter, NotifChainDb, NotifChainElem, Opcode, ReplayHandler};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

pub const ROUTES_CHAIN: &str = "routes";

pub const ROUTE_KEY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey {
    pub dest: Ipv4Addr,
    pub mask: u8,
}

impl RouteKey {
    pub fn new(dest: Ipv4Addr, mask: u8) -> Self {
        Self { dest, mask }
    }

    /// Parse `a.b.c.d/m`
    pub fn parse(prefix: &str) -> Result<Self> {
        let (dest, mask) = prefix
            .split_once('/')
            .with_context(|| format!("'{}' is missing a /mask", prefix))?;
        let dest: Ipv4Addr = dest.parse().with_context(|| format!("bad destination in '{}'", prefix))?;
        let mask: u8 = mask.parse().with_context(|| format!("bad mask in '{}'", prefix))?;
        if mask > 32 {
            bail!("mask {} out of range in '{}'", mask, prefix);
        }
        Ok(Self { dest, mask })
    }

    pub fn to_bytes(self) -> [u8; ROUTE_KEY_LEN] {
        let [a, b, c, d] = self.dest.octets();
        [a, b, c, d, self.mask]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c, d, mask] => Some(Self::new(Ipv4Addr::new(*a, *b, *c, *d), *mask)),
            _ => None,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dest, self.mask)
    }
}

/// Compares the fixed-size route keys byte-wise
pub fn route_key_comparator() -> KeyComparator {
    Arc::new(|a: &[u8], b: &[u8]| {
        let len = ROUTE_KEY_LEN.min(a.len()).min(b.len());
        a[..len].cmp(&b[..len]).then(a.len().cmp(&b.len()))
    })
}

pub fn route_key_printer() -> KeyPrinter {
    Arc::new(|key: &[u8]| match RouteKey::from_bytes(key) {
        Some(route) => route.to_string(),
        None => format!("<{} byte key>", key.len()),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub key: RouteKey,
    pub gateway: Ipv4Addr,
    pub oif: String,
}

impl RouteEntry {
    pub fn new(key: RouteKey, gateway: Ipv4Addr, oif: impl Into<String>) -> Self {
        Self {
            key,
            gateway,
            oif: oif.into(),
        }
    }

    pub fn payload(&self) -> Bytes {
        Bytes::from(format!("gw={} oif={}", self.gateway, self.oif))
    }
}

/// Publisher-side routing table wired to the "routes" chain
pub struct RouteTable {
    db: Arc<NotifChainDb>,
    routes: Mutex<BTreeMap<RouteKey, RouteEntry>>,
}

impl RouteTable {
    /// Create the "routes" chain on `db` and an empty table over it
    pub fn new(db: Arc<NotifChainDb>) -> Result<Arc<Self>> {
        db.init(ROUTES_CHAIN, Some(route_key_comparator()), Some(route_key_printer()))?;
        Ok(Arc::new(Self {
            db,
            routes: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn db(&self) -> &Arc<NotifChainDb> {
        &self.db
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    async fn notify(&self, opcode: Opcode, key: RouteKey, payload: Option<&[u8]>) -> Result<InvokeReport> {
        let event = NotifChainElem::event(opcode, Some(&key.to_bytes()), payload);
        Ok(self.db.invoke(ROUTES_CHAIN, Some(&event)).await?)
    }

    pub async fn add(&self, entry: RouteEntry) -> Result<InvokeReport> {
        let key = entry.key;
        let payload = entry.payload();
        if self.routes.lock().insert(key, entry).is_some() {
            bail!("route {} already exists", key);
        }
        info!(route = %key, "Route added");
        self.notify(Opcode::Create, key, Some(&payload)).await
    }

    pub async fn update(&self, key: RouteKey, gateway: Ipv4Addr, oif: &str) -> Result<InvokeReport> {
        let payload = {
            let mut routes = self.routes.lock();
            let entry = routes.get_mut(&key).with_context(|| format!("no route {}", key))?;
            entry.gateway = gateway;
            entry.oif = oif.to_string();
            entry.payload()
        };
        info!(route = %key, "Route updated");
        self.notify(Opcode::Update, key, Some(&payload)).await
    }

    pub async fn delete(&self, key: RouteKey) -> Result<InvokeReport> {
        if self.routes.lock().remove(&key).is_none() {
            bail!("no route {}", key);
        }
        info!(route = %key, "Route deleted");
        self.notify(Opcode::Delete, key, None).await
    }

    /// Re-announce every route as CREATE
    pub async fn replay(&self) -> Result<usize> {
        let entries: Vec<RouteEntry> = self.routes.lock().values().cloned().collect();
        let mut delivered = 0;
        for entry in &entries {
            delivered += self.notify(Opcode::Create, entry.key, Some(&entry.payload())).await?.delivered;
        }
        Ok(delivered)
    }

    /// NOTIFY_ALL handler that replays the table on a background task
    pub fn replay_handler(self: &Arc<Self>) -> ReplayHandler {
        let table = Arc::clone(self);
        Arc::new(move |chain: &str, request: &NotifChainElem| {
            if chain != ROUTES_CHAIN {
                return;
            }
            let table = table.clone();
            let client_id = request.client_id;
            tokio::spawn(async move {
                match table.replay().await {
                    Ok(delivered) => info!(client_id, delivered, "Routing table replayed"),
                    Err(e) => warn!(client_id, error = %e, "Routing table replay failed"),
                }
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_route_key_encoding() {
        let key = RouteKey::parse("10.0.0.1/32").unwrap();
        assert_eq!(key.to_bytes(), [10, 0, 0, 1, 32]);
        assert_eq!(RouteKey::from_bytes(&key.to_bytes()), Some(key));
        assert_eq!(key.to_string(), "10.0.0.1/32");

        assert!(RouteKey::parse("10.0.0.1").is_err());
        assert!(RouteKey::parse("10.0.0.1/33").is_err());
        assert!(RouteKey::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_comparator_and_printer() {
        let compare = route_key_comparator();
        let a = RouteKey::parse("10.0.0.1/32").unwrap().to_bytes();
        let b = RouteKey::parse("10.0.0.1/24").unwrap().to_bytes();
        assert_eq!(compare(&a, &a), Ordering::Equal);
        assert_ne!(compare(&a, &b), Ordering::Equal);

        let print = route_key_printer();
        assert_eq!(print(&b), "10.0.0.1/24");
        assert_eq!(print(b"xy"), "<2 byte key>");
    }
}
