//! Registry of notification chains
//!
//! An explicit object, not process-global state: a publisher owns one
//! `NotifChainDb` and every engine operation goes through it. Chains are
//! looked up by name in a concurrent map; each chain serializes its own
//! mutations, and the channel directory is shared by all of them.

use crate::chain::{InvokeReport, KeyComparator, KeyPrinter, NotifChain};
use crate::channel::{ChannelDirectory, CommChannel};
use crate::config::EngineSettings;
use crate::elem::NotifChainElem;
use crate::error::{NotifError, NotifResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use notif_codec::NOTIF_NAME_SIZE;
use std::sync::Arc;
use tracing::{info, warn};

pub struct NotifChainDb {
    chains: DashMap<String, Arc<NotifChain>>,
    directory: ChannelDirectory,
    settings: EngineSettings,
}

impl Default for NotifChainDb {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifChainDb {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self {
            chains: DashMap::new(),
            directory: ChannelDirectory::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Register a new chain
    pub fn init(
        &self,
        name: &str,
        comparator: Option<KeyComparator>,
        printer: Option<KeyPrinter>,
    ) -> NotifResult<Arc<NotifChain>> {
        if name.len() > NOTIF_NAME_SIZE {
            return Err(NotifError::NameTooLong {
                name: name.to_string(),
                max: NOTIF_NAME_SIZE,
            });
        }

        match self.chains.entry(name.to_string()) {
            Entry::Occupied(_) => Err(NotifError::ChainAlreadyExists { name: name.to_string() }),
            Entry::Vacant(slot) => {
                let chain = Arc::new(NotifChain::new(name, comparator, printer));
                slot.insert(chain.clone());
                info!(chain = name, "Notification chain created");
                Ok(chain)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<NotifChain>> {
        self.chains.get(name).map(|entry| entry.value().clone())
    }

    fn require(&self, name: &str) -> NotifResult<Arc<NotifChain>> {
        self.lookup(name).ok_or_else(|| NotifError::UnknownChain { name: name.to_string() })
    }

    /// Remove a chain, releasing all of its elements
    pub fn delete(&self, name: &str) -> NotifResult<usize> {
        let (_, chain) = self
            .chains
            .remove(name)
            .ok_or_else(|| NotifError::UnknownChain { name: name.to_string() })?;
        let released = chain.clear();
        self.directory.prune();
        info!(chain = name, released, "Notification chain deleted");
        Ok(released)
    }

    /// Sorted chain names
    pub fn chain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Register `elem` on the named chain
    ///
    /// The element is consumed whether or not the subscription succeeds.
    pub fn subscribe(&self, name: &str, elem: NotifChainElem) -> NotifResult<()> {
        let chain = self.require(name)?;
        if let Some(key) = elem.key_bytes() {
            if key.len() > self.settings.max_key_len {
                return Err(NotifError::KeyTooLong {
                    len: key.len(),
                    max: self.settings.max_key_len,
                });
            }
        }

        chain.subscribe(elem, &self.directory).map_err(|e| {
            warn!(chain = name, error = %e, "Subscription rejected");
            e
        })
    }

    /// Remove the elements matching `request`, returning how many went
    pub fn unsubscribe(&self, name: &str, request: &NotifChainElem) -> NotifResult<usize> {
        let removed = self.require(name)?.unsubscribe(request);
        self.directory.prune();
        Ok(removed)
    }

    /// Remove every element of `client_id` reachable through `channel`
    pub fn unsubscribe_all(&self, name: &str, client_id: u32, channel: &CommChannel) -> NotifResult<usize> {
        let removed = self.require(name)?.unsubscribe_client(client_id, channel);
        self.directory.prune();
        Ok(removed)
    }

    /// Notify the named chain's subscribers of `event`
    pub async fn invoke(&self, name: &str, event: Option<&NotifChainElem>) -> NotifResult<InvokeReport> {
        let chain = self.require(name)?;
        Ok(chain.invoke(event).await)
    }

    /// Live subscriptions holding the client's channel matching `template`
    pub fn channel_ref_count(&self, client_id: u32, template: &CommChannel) -> usize {
        self.directory.ref_count(client_id, template)
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.directory
    }

    pub fn dump(&self) -> String {
        self.chain_names()
            .iter()
            .filter_map(|name| self.lookup(name))
            .map(|chain| chain.dump())
            .collect()
    }
}
