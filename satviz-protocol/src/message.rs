//! Message types of the satviz session protocol.

use crate::blueprint::{Blueprint, Payload};
use crate::sat::{ClauseUpdate, SatAssignment, UpdateKind};
use crate::serial::{
    ClauseSerializer, NullSerializer, SatAssignmentSerializer, StringMap, StringMapSerializer,
    StringSerializer,
};
use std::fmt;

/// Message type byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Producer identifies itself (string map).
    Offer = 1,
    /// Consumer accepts the producer (null).
    Start = 2,
    /// Consumer ends the session (null).
    Stop = 3,
    /// Producer found a satisfying assignment.
    TermSolve = 8,
    /// Producer proved unsatisfiability (null).
    TermRefute = 9,
    /// Producer ended for another reason (string).
    TermOther = 10,
    /// Clause added (clause).
    ClauseAdd = b'a',
    /// Clause removed (clause).
    ClauseDel = b'd',
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::Offer,
        MessageType::Start,
        MessageType::Stop,
        MessageType::TermSolve,
        MessageType::TermRefute,
        MessageType::TermOther,
        MessageType::ClauseAdd,
        MessageType::ClauseDel,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for the three producer-side terminal messages.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageType::TermSolve | MessageType::TermRefute | MessageType::TermOther
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_u8() == value)
            .ok_or(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Offer => "OFFER",
            MessageType::Start => "START",
            MessageType::Stop => "STOP",
            MessageType::TermSolve => "TERM_SOLVE",
            MessageType::TermRefute => "TERM_REFUTE",
            MessageType::TermOther => "TERM_OTHER",
            MessageType::ClauseAdd => "CLAUSE_ADD",
            MessageType::ClauseDel => "CLAUSE_DEL",
        };
        f.write_str(name)
    }
}

impl Blueprint {
    /// The blueprint of the session protocol.
    pub fn satviz() -> Self {
        Blueprint::new()
            .with_codec(MessageType::Offer.as_u8(), StringMapSerializer)
            .with_codec(MessageType::Start.as_u8(), NullSerializer)
            .with_codec(MessageType::Stop.as_u8(), NullSerializer)
            .with_codec(MessageType::TermSolve.as_u8(), SatAssignmentSerializer)
            .with_codec(MessageType::TermRefute.as_u8(), NullSerializer)
            .with_codec(MessageType::TermOther.as_u8(), StringSerializer)
            .with_codec(MessageType::ClauseAdd.as_u8(), ClauseSerializer)
            .with_codec(MessageType::ClauseDel.as_u8(), ClauseSerializer)
    }
}

/// A decoded message: type byte plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u8,
    pub payload: Payload,
}

impl Message {
    pub fn new(msg_type: u8, payload: Payload) -> Self {
        Self { msg_type, payload }
    }

    pub fn offer(map: StringMap) -> Self {
        Self::new(MessageType::Offer.as_u8(), Payload::Map(map))
    }

    pub fn start() -> Self {
        Self::new(MessageType::Start.as_u8(), Payload::None)
    }

    pub fn stop() -> Self {
        Self::new(MessageType::Stop.as_u8(), Payload::None)
    }

    /// A CLAUSE_ADD or CLAUSE_DEL message, depending on the update kind.
    pub fn clause_update(update: ClauseUpdate) -> Self {
        let msg_type = match update.kind {
            UpdateKind::Add => MessageType::ClauseAdd,
            UpdateKind::Remove => MessageType::ClauseDel,
        };
        Self::new(msg_type.as_u8(), Payload::Clause(update.clause))
    }

    pub fn term_solve(assignment: SatAssignment) -> Self {
        Self::new(MessageType::TermSolve.as_u8(), Payload::Assignment(assignment))
    }

    pub fn term_refute() -> Self {
        Self::new(MessageType::TermRefute.as_u8(), Payload::None)
    }

    pub fn term_other(reason: impl Into<String>) -> Self {
        Self::new(MessageType::TermOther.as_u8(), Payload::Text(reason.into()))
    }

    /// The known message type, if any.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }

    /// Reassembles a clause update from a CLAUSE_ADD/CLAUSE_DEL message.
    pub fn into_clause_update(self) -> Option<ClauseUpdate> {
        let kind = match self.kind()? {
            MessageType::ClauseAdd => UpdateKind::Add,
            MessageType::ClauseDel => UpdateKind::Remove,
            _ => return None,
        };
        match self.payload {
            Payload::Clause(clause) => Some(ClauseUpdate { clause, kind }),
            _ => None,
        }
    }
}
