//! The subscription tree.
//!
//! One node per dot-separated topic segment. Nodes are created lazily on
//! subscribe and only removed by an explicit prune.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BusError, Result};
use crate::subscriber::{Subscriber, SubscriptionId};

/// Split a topic into its segments. The empty topic is the root.
pub(crate) fn segments(topic: &str) -> Result<Vec<&str>> {
    if topic.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = topic.split('.').collect();
    if parts.iter().any(|s| s.is_empty()) {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(parts)
}

#[derive(Default)]
pub(crate) struct SubscriptionNode {
    children: HashMap<String, SubscriptionNode>,
    subscribers: Vec<(SubscriptionId, Arc<dyn Subscriber>)>,
}

impl SubscriptionNode {
    pub(crate) fn subscribe(
        &mut self,
        path: &[&str],
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber>,
    ) {
        let mut node = self;
        for segment in path {
            node = node.children.entry((*segment).to_string()).or_default();
        }
        node.subscribers.push((id, subscriber));
    }

    /// Remove one subscription. Returns false if it was not there.
    pub(crate) fn unsubscribe(&mut self, path: &[&str], id: SubscriptionId) -> bool {
        let Some(node) = self.find_mut(path) else {
            return false;
        };
        let before = node.subscribers.len();
        node.subscribers.retain(|(sub_id, _)| *sub_id != id);
        node.subscribers.len() != before
    }

    /// Subscribers in delivery order: the deepest node matched by `path`
    /// first, then each ancestor up to and including the root.
    pub(crate) fn delivery_chain(&self, path: &[&str]) -> Vec<Arc<dyn Subscriber>> {
        let mut chain: Vec<&Self> = vec![self];
        let mut node = self;
        for segment in path {
            match node.children.get(*segment) {
                Some(child) => {
                    chain.push(child);
                    node = child;
                }
                None => break,
            }
        }
        chain
            .iter()
            .rev()
            .flat_map(|n| n.subscribers.iter().map(|(_, s)| Arc::clone(s)))
            .collect()
    }

    pub(crate) fn subscriber_count(&self, path: &[&str]) -> usize {
        self.find(path).map_or(0, |n| n.subscribers.len())
    }

    pub(crate) fn node_count(&self) -> usize {
        1 + self.children.values().map(Self::node_count).sum::<usize>()
    }

    pub(crate) fn clear_subscribers(&mut self) {
        self.subscribers.clear();
        for child in self.children.values_mut() {
            child.clear_subscribers();
        }
    }

    /// Drop every descendant with no subscribers and no remaining children.
    pub(crate) fn prune(&mut self) {
        for child in self.children.values_mut() {
            child.prune();
        }
        self.children
            .retain(|_, child| !child.subscribers.is_empty() || !child.children.is_empty());
    }

    fn find(&self, path: &[&str]) -> Option<&Self> {
        path.iter()
            .try_fold(self, |node, segment| node.children.get(*segment))
    }

    fn find_mut(&mut self, path: &[&str]) -> Option<&mut Self> {
        path.iter()
            .try_fold(self, |node, segment| node.children.get_mut(*segment))
    }
}
