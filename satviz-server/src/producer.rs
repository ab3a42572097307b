//! Identity of a connected producer.

use crate::server::ConnectionId;
use satviz_protocol::Offer;
use std::fmt;
use std::net::SocketAddr;

/// A producer that has sent a valid OFFER.
///
/// Built once from the OFFER payload; its fields never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerId {
    id: ConnectionId,
    address: SocketAddr,
    offer: Offer,
}

impl ProducerId {
    pub fn new(id: ConnectionId, address: SocketAddr, offer: Offer) -> Self {
        Self { id, address, offer }
    }

    /// Connection the producer is attached to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn is_solver(&self) -> bool {
        matches!(self.offer, Offer::Solver { .. })
    }

    /// Solver name, if the producer is a solver.
    pub fn solver_name(&self) -> Option<&str> {
        match &self.offer {
            Offer::Solver { name, .. } => Some(name),
            Offer::Proof => None,
        }
    }

    pub fn instance_hash(&self) -> Option<u64> {
        match &self.offer {
            Offer::Solver { instance_hash, .. } => Some(*instance_hash),
            Offer::Proof => None,
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self.offer, Offer::Solver { delayed: true, .. })
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.offer {
            Offer::Solver {
                name,
                instance_hash,
                ..
            } => write!(
                f,
                "solver '{}' ({:016x}) {} at {}",
                name, instance_hash, self.id, self.address
            ),
            Offer::Proof => write!(f, "proof {} at {}", self.id, self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_solver_accessors() {
        let pid = ProducerId::new(ConnectionId(2), addr(), Offer::solver("cadical", true, 42));
        assert!(pid.is_solver());
        assert!(pid.is_delayed());
        assert_eq!(pid.solver_name(), Some("cadical"));
        assert_eq!(pid.instance_hash(), Some(42));
        assert_eq!(pid.id(), ConnectionId(2));
        assert_eq!(
            pid.to_string(),
            "solver 'cadical' (000000000000002a) #2 at 127.0.0.1:5000"
        );
    }

    #[test]
    fn test_proof_accessors() {
        let pid = ProducerId::new(ConnectionId(0), addr(), Offer::Proof);
        assert!(!pid.is_solver());
        assert!(!pid.is_delayed());
        assert_eq!(pid.solver_name(), None);
        assert_eq!(pid.instance_hash(), None);
        assert_eq!(pid.to_string(), "proof #0 at 127.0.0.1:5000");
    }
}
