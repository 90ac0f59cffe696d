use crate::domain::ports::{ReputationEvent, ReputationSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Score below which a node is banned.
pub const BAN_THRESHOLD: f64 = -50.0;

/// Weight of an event. Manual bans and unbans set the score instead of
/// adjusting it.
pub fn event_weight(event: ReputationEvent) -> f64 {
    match event {
        ReputationEvent::ManualBan => f64::NEG_INFINITY,
        ReputationEvent::ManualUnban => 0.0,
        ReputationEvent::PacketTimeout => -1.0,
        ReputationEvent::SwapFailure => -10.0,
        ReputationEvent::SwapSuccess => 1.0,
        ReputationEvent::WireProtocolErr => -5.0,
        ReputationEvent::InvalidAuth => -20.0,
        ReputationEvent::SwapTimeout => -15.0,
        ReputationEvent::SwapMisbehavior => -20.0,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeReputation {
    pub score: f64,
    pub banned: bool,
    pub events: Vec<ReputationEvent>,
}

/// In-memory reputation scores with ban and unban at [`BAN_THRESHOLD`].
#[derive(Default, Clone)]
pub struct ReputationTracker {
    nodes: Arc<RwLock<HashMap<String, NodeReputation>>>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reputation(&self, node_pub_key: &str) -> Option<NodeReputation> {
        self.nodes.read().await.get(node_pub_key).cloned()
    }

    pub async fn is_banned(&self, node_pub_key: &str) -> bool {
        self.nodes
            .read()
            .await
            .get(node_pub_key)
            .is_some_and(|node| node.banned)
    }
}

#[async_trait]
impl ReputationSink for ReputationTracker {
    async fn add_reputation_event(&self, node_pub_key: &str, event: ReputationEvent) {
        let mut nodes = self.nodes.write().await;
        let node = nodes.entry(node_pub_key.to_string()).or_default();

        match event {
            ReputationEvent::ManualBan | ReputationEvent::ManualUnban => {
                node.score = event_weight(event)
            }
            _ => node.score += event_weight(event),
        }
        node.events.push(event);

        if node.score < BAN_THRESHOLD && !node.banned {
            node.banned = true;
            warn!(node = node_pub_key, score = node.score, ?event, "banning node");
        } else if node.score >= BAN_THRESHOLD && node.banned {
            node.banned = false;
            info!(node = node_pub_key, score = node.score, "unbanning node");
        }
    }
}
