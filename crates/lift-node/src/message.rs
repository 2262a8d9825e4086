//! Gossip wire messages.
//!
//! All messages travel as tagged JSON objects:
//!
//! ```text
//! {"type": "update",   ...VersionedUpdate fields}
//! {"type": "decided",  "slot": u64, "proposal": {...}}
//! {"type": "join",     "node": NodeId}
//! {"type": "frontier", "node": NodeId, "delivered": {NodeId: u64}}
//! ```

use crate::consensus::Decision;
use crate::error::Result;
use crate::update::VersionedUpdate;
use lift_core::operation::NodeId;
use lift_core::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    /// A locally committed liftable update.
    Update(VersionedUpdate),
    /// A consensus decision, broadcast by the proposing node.
    Decided(Decision),
    /// A node entered the cluster.
    Join { node: NodeId },
    /// A node's delivery frontier, for stability tracking.
    Frontier { node: NodeId, delivered: VectorClock },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Update(_) => "update",
            GossipMessage::Decided(_) => "decided",
            GossipMessage::Join { .. } => "join",
            GossipMessage::Frontier { .. } => "frontier",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{Proposal, ProposalId};
    use crate::error::NodeError;
    use crate::update::UpdateId;
    use lift_core::operation::Operation;

    #[test]
    fn test_update_keeps_flat_wire_fields() {
        let origin = NodeId::from("a");
        let update = VersionedUpdate::new(
            UpdateId::from_u128(1),
            origin.clone(),
            VectorClock::from_entries([(origin, 1)]),
            vec![Operation::max("hi", 3)],
        );
        let message = GossipMessage::Update(update);

        let value: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["origin_node"], "a");
        assert_eq!(value["vector_clock"]["a"], 1);

        let decoded = GossipMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decided_and_control_messages_decode() {
        let decided = GossipMessage::Decided(Decision {
            slot: 3,
            proposal: Proposal {
                id: ProposalId::from_u128(9),
                origin: NodeId::from("b"),
                operations: vec![Operation::overwrite("s", "x")],
                clock: VectorClock::new(),
            },
        });
        let join = GossipMessage::Join {
            node: NodeId::from("c"),
        };
        for message in [decided, join] {
            let bytes = message.encode().unwrap();
            assert_eq!(GossipMessage::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_garbage_is_an_encoding_error() {
        let err = GossipMessage::decode(b"{\"type\":\"nope\"}").unwrap_err();
        assert!(matches!(err, NodeError::Encoding(_)));
    }
}
