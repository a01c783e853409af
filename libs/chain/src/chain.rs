//! A single notification chain
//!
//! Elements are kept in client-id order; subscriptions of the same client
//! keep their arrival order. All mutation happens under the chain's own
//! lock, and `invoke` releases that lock before dispatching so subscriber
//! callbacks may call back into the registry.

use crate::channel::{ChannelDirectory, CommChannel};
use crate::dispatch::{deliver, Delivery};
use crate::elem::NotifChainElem;
use crate::error::{NotifError, NotifResult};
use notif_codec::Opcode;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orders (and so equates) application keys
pub type KeyComparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Renders an application key for dumps and logs
pub type KeyPrinter = Arc<dyn Fn(&[u8]) -> String + Send + Sync>;

/// Outcome counters of one `invoke`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeReport {
    /// Elements whose key passed the filter
    pub matched: usize,
    pub delivered: usize,
    /// Channels with no delivery mechanism on this host
    pub skipped: usize,
    pub failed: usize,
}

pub struct NotifChain {
    name: Arc<str>,
    comparator: Option<KeyComparator>,
    printer: Option<KeyPrinter>,
    elems: Mutex<Vec<NotifChainElem>>,
}

impl NotifChain {
    pub(crate) fn new(name: &str, comparator: Option<KeyComparator>, printer: Option<KeyPrinter>) -> Self {
        Self {
            name: Arc::from(name),
            comparator,
            printer,
            elems: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.elems.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.lock().is_empty()
    }

    /// Snapshot of the stored elements in dispatch order
    pub fn elements(&self) -> Vec<NotifChainElem> {
        self.elems.lock().clone()
    }

    /// Both absent: equal. One absent: different. Otherwise the comparator
    /// decides, falling back to byte equality.
    fn keys_equal(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => match &self.comparator {
                Some(compare) => compare(a, b) == Ordering::Equal,
                None => a == b,
            },
            _ => false,
        }
    }

    /// Key filter applied by `invoke`: only a configured comparator with
    /// both keys present can exclude an element
    fn invoke_filter(&self, event_key: Option<&[u8]>, elem_key: Option<&[u8]>) -> bool {
        match (&self.comparator, event_key, elem_key) {
            (Some(compare), Some(a), Some(b)) => compare(a, b) == Ordering::Equal,
            _ => true,
        }
    }

    /// Register `elem`, resolving its channel through `directory`
    pub(crate) fn subscribe(&self, mut elem: NotifChainElem, directory: &ChannelDirectory) -> NotifResult<()> {
        if !elem.channel.can_deliver() {
            return Err(NotifError::InvalidChannel {
                kind: elem.channel.kind(),
            });
        }

        let mut elems = self.elems.lock();

        let start = elems.partition_point(|e| e.client_id < elem.client_id);
        let end = elems.partition_point(|e| e.client_id <= elem.client_id);
        if elems[start..end]
            .iter()
            .any(|existing| self.keys_equal(existing.key_bytes(), elem.key_bytes()))
        {
            return Err(NotifError::DuplicateSubscription {
                chain: self.name.to_string(),
                client_id: elem.client_id,
            });
        }

        let template = Arc::try_unwrap(elem.channel).unwrap_or_else(|shared| shared.as_ref().clone());
        elem.channel = directory.record_channel_per_client(elem.client_id, template);

        info!(
            chain = %self.name,
            client_id = elem.client_id,
            key = %self.render_key(elem.key_bytes()),
            channel = %elem.channel,
            "Subscribed"
        );
        elems.insert(end, elem);
        Ok(())
    }

    /// Remove every element of the request's client whose key and channel
    /// match; an absent request key or an `Any` channel matches everything
    pub(crate) fn unsubscribe(&self, request: &NotifChainElem) -> usize {
        let removed = {
            let mut elems = self.elems.lock();
            let before = elems.len();
            elems.retain(|elem| {
                let matched = elem.client_id == request.client_id
                    && (request.key.is_none() || self.keys_equal(elem.key_bytes(), request.key_bytes()))
                    && request.channel.matches(&elem.channel);
                !matched
            });
            before - elems.len()
        };

        if removed > 0 {
            info!(chain = %self.name, client_id = request.client_id, removed, "Unsubscribed");
        } else {
            debug!(chain = %self.name, client_id = request.client_id, "Unsubscribe matched nothing");
        }
        removed
    }

    /// Remove all of a client's elements reachable through `channel`
    pub(crate) fn unsubscribe_client(&self, client_id: u32, channel: &CommChannel) -> usize {
        let removed = {
            let mut elems = self.elems.lock();
            let before = elems.len();
            elems.retain(|elem| !(elem.client_id == client_id && channel.matches(&elem.channel)));
            before - elems.len()
        };
        info!(chain = %self.name, client_id, removed, "Client unsubscribed from chain");
        removed
    }

    pub(crate) fn clear(&self) -> usize {
        let mut elems = self.elems.lock();
        let released = elems.len();
        elems.clear();
        released
    }

    /// Notify every subscriber whose key matches `event`
    ///
    /// Matching elements are stamped with the event's opcode and payload
    /// before dispatch. Without an event they are stamped `UNKNOWN` (a
    /// heartbeat) and keep their previous payload. Delivery failures are
    /// logged and counted, never retried.
    pub async fn invoke(&self, event: Option<&NotifChainElem>) -> InvokeReport {
        let opcode = event.map(|e| e.opcode).unwrap_or(Opcode::Unknown);
        let event_key = event.and_then(|e| e.key_bytes());

        let targets: Vec<NotifChainElem> = {
            let mut elems = self.elems.lock();
            elems
                .iter_mut()
                .filter(|elem| self.invoke_filter(event_key, elem.key_bytes()))
                .map(|elem| {
                    elem.opcode = opcode;
                    if let Some(event) = event {
                        elem.payload = event.payload.clone();
                    }
                    elem.clone()
                })
                .collect()
        };

        let mut report = InvokeReport {
            matched: targets.len(),
            ..Default::default()
        };

        for elem in &targets {
            match deliver(&self.name, elem).await {
                Ok(Delivery::Delivered) => report.delivered += 1,
                Ok(Delivery::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        chain = %self.name,
                        client_id = elem.client_id,
                        channel = %elem.channel,
                        error = %e,
                        category = e.category(),
                        "Notification delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            chain = %self.name,
            opcode = %opcode,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "Chain invoked"
        );
        report
    }

    fn render_key(&self, key: Option<&[u8]>) -> String {
        match (key, &self.printer) {
            (None, _) => "*".to_string(),
            (Some(key), Some(print)) => print(key),
            (Some(key), None) => key.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }

    /// Human readable listing of the chain's subscriptions
    pub fn dump(&self) -> String {
        let elems = self.elems.lock();
        let mut out = String::new();
        let _ = writeln!(out, "Notif Chain Name : {} ({} elements)", self.name, elems.len());
        for elem in elems.iter() {
            let _ = writeln!(
                out,
                "  client {:>6}  key {:<24}  opcode {:<22}  channel {}",
                elem.client_id,
                self.render_key(elem.key_bytes()),
                elem.opcode,
                elem.channel
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elem::Notification;
    use bytes::Bytes;
    use notif_codec::Protocol;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn prefix_comparator() -> KeyComparator {
        // first byte only, so several keys compare equal
        Arc::new(|a: &[u8], b: &[u8]| a[..1].cmp(&b[..1]))
    }

    fn recording(log: &Arc<Mutex<Vec<Notification>>>) -> CommChannel {
        let log = log.clone();
        CommChannel::callback(move |n| log.lock().push(n.clone()))
    }

    fn udp(port: u16) -> CommChannel {
        CommChannel::inet(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), Protocol::Udp)
    }

    #[test]
    fn test_elements_ordered_by_client_id() {
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        for (client, key) in [(5u32, b"a"), (1, b"b"), (5, b"c"), (3, b"d")] {
            chain
                .subscribe(NotifChainElem::new(client, udp(2001)).with_key(&key[..]), &directory)
                .unwrap();
        }

        let order: Vec<_> = chain
            .elements()
            .iter()
            .map(|e| (e.client_id, e.key.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, Bytes::from_static(b"b")),
                (3, Bytes::from_static(b"d")),
                (5, Bytes::from_static(b"a")),
                (5, Bytes::from_static(b"c")),
            ]
        );
    }

    #[test]
    fn test_duplicate_uses_comparator() {
        let chain = NotifChain::new("routes", Some(prefix_comparator()), None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"x1"[..]), &directory)
            .unwrap();

        let err = chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"x2"[..]), &directory)
            .unwrap_err();
        assert!(matches!(err, NotifError::DuplicateSubscription { client_id: 1, .. }));

        // other client, same key
        chain
            .subscribe(NotifChainElem::new(2, udp(2001)).with_key(&b"x1"[..]), &directory)
            .unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_wildcard_key_is_distinct_from_keyed() {
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        chain.subscribe(NotifChainElem::new(1, udp(2001)), &directory).unwrap();
        chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"k"[..]), &directory)
            .unwrap();
        assert!(chain.subscribe(NotifChainElem::new(1, udp(2001)), &directory).is_err());
    }

    #[test]
    fn test_any_and_unknown_channels_rejected() {
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        for channel in [CommChannel::Any, CommChannel::Unknown] {
            let err = chain.subscribe(NotifChainElem::new(1, channel), &directory).unwrap_err();
            assert!(matches!(err, NotifError::InvalidChannel { .. }));
        }
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unsubscribe_filters_by_channel_unless_any() {
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"a"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(1, udp(2003)).with_key(&b"b"[..]), &directory)
            .unwrap();

        let wrong_channel = NotifChainElem::new(1, udp(2009)).with_key(&b"a"[..]);
        assert_eq!(chain.unsubscribe(&wrong_channel), 0);

        let by_any = NotifChainElem::new(1, CommChannel::Any).with_key(&b"a"[..]);
        assert_eq!(chain.unsubscribe(&by_any), 1);
        assert_eq!(chain.len(), 1);

        let everything = NotifChainElem::new(1, CommChannel::Any);
        assert_eq!(chain.unsubscribe(&everything), 1);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unsubscribe_removes_all_comparator_matches() {
        let chain = NotifChain::new("routes", Some(prefix_comparator()), None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"a1"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(1, udp(2001)).with_key(&b"b1"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(2, udp(2001)).with_key(&b"a9"[..]), &directory)
            .unwrap();

        let request = NotifChainElem::new(1, CommChannel::Any).with_key(&b"a7"[..]);
        assert_eq!(chain.unsubscribe(&request), 1);
        assert_eq!(chain.unsubscribe_client(2, &CommChannel::Any), 1);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_filters_and_stamps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = NotifChain::new("routes", Some(prefix_comparator()), None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, recording(&log)).with_key(&b"a"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(2, recording(&log)).with_key(&b"b"[..]), &directory)
            .unwrap();
        chain.subscribe(NotifChainElem::new(3, recording(&log)), &directory).unwrap();

        let event = NotifChainElem::event(Opcode::Update, Some(b"a"), Some(b"UPDATED"));
        let report = chain.invoke(Some(&event)).await;
        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 2);

        let seen: Vec<_> = log.lock().iter().map(|n| (n.client_id, n.opcode)).collect();
        assert_eq!(seen, vec![(1, Opcode::Update), (3, Opcode::Update)]);
        assert_eq!(log.lock()[0].payload.as_deref(), Some(&b"UPDATED"[..]));
        assert_eq!(&*log.lock()[0].chain, "routes");

        let stored = chain.elements();
        assert_eq!(stored[0].opcode, Opcode::Update);
        assert_eq!(stored[1].opcode, Opcode::Unknown);
    }

    #[tokio::test]
    async fn test_invoke_without_event_is_heartbeat() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = NotifChain::new("routes", Some(prefix_comparator()), None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, recording(&log)).with_key(&b"a"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(2, recording(&log)).with_key(&b"b"[..]), &directory)
            .unwrap();

        let report = chain.invoke(None).await;
        assert_eq!(report.delivered, 2);
        assert!(log.lock().iter().all(|n| n.opcode == Opcode::Unknown));
    }

    #[tokio::test]
    async fn test_invoke_without_comparator_notifies_everyone() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, recording(&log)).with_key(&b"a"[..]), &directory)
            .unwrap();
        chain
            .subscribe(NotifChainElem::new(2, recording(&log)).with_key(&b"b"[..]), &directory)
            .unwrap();

        let event = NotifChainElem::event(Opcode::Delete, Some(b"zzz"), None);
        assert_eq!(chain.invoke(Some(&event)).await.delivered, 2);
    }

    #[tokio::test]
    async fn test_invoke_counts_unsupported_channels() {
        let chain = NotifChain::new("routes", None, None);
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(1, CommChannel::message_queue("/routes")), &directory)
            .unwrap();

        let report = chain.invoke(Some(&NotifChainElem::event(Opcode::Create, None, None))).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn test_dump_uses_printer() {
        let printer: KeyPrinter = Arc::new(|k: &[u8]| format!("<{}>", k.len()));
        let chain = NotifChain::new("routes", None, Some(printer));
        let directory = ChannelDirectory::new();
        chain
            .subscribe(NotifChainElem::new(9, udp(2001)).with_key(&b"abc"[..]), &directory)
            .unwrap();

        let dump = chain.dump();
        assert!(dump.starts_with("Notif Chain Name : routes (1 elements)"));
        assert!(dump.contains("<3>"));
        assert!(dump.contains("udp://127.0.0.1:2001"));
    }
}
