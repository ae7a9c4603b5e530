//! Protocol messages and their wire encoding.
//!
//! Every envelope carries exactly one of seven message kinds. Envelopes are
//! bincode-encoded with a hard size limit; anything that fails to decode is
//! the caller's to drop.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::serialize;
use crate::types::context::{Epoch, OracleId, ReportingContext, Round};
use crate::types::observation::Observation;
use crate::types::report::{ContractReport, ContractReportWithSignatures};

/// Upper bound on an encoded envelope, in bytes
pub const MAX_MESSAGE_SIZE: u64 = 512 * 1024;

/// A completed report as broadcast by the leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFinal {
    pub epoch: Epoch,
    pub leader: OracleId,
    pub round: Round,
    pub report: ContractReportWithSignatures,
}

impl MessageFinal {
    pub fn context(&self) -> &ReportingContext {
        self.report.context()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    NewEpoch {
        epoch: Epoch,
    },
    ObserveRequest {
        epoch: Epoch,
        round: Round,
    },
    Observe {
        epoch: Epoch,
        round: Round,
        observation: Observation,
    },
    ReportRequest {
        epoch: Epoch,
        round: Round,
        observations: Vec<Observation>,
    },
    Report {
        epoch: Epoch,
        round: Round,
        contract_report: ContractReport,
    },
    Final(MessageFinal),
    FinalEcho {
        final_message: MessageFinal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NewEpoch,
    ObserveRequest,
    Observe,
    ReportRequest,
    Report,
    Final,
    FinalEcho,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::NewEpoch => "new-epoch",
            MessageKind::ObserveRequest => "observe-req",
            MessageKind::Observe => "observe",
            MessageKind::ReportRequest => "report-req",
            MessageKind::Report => "report",
            MessageKind::Final => "final",
            MessageKind::FinalEcho => "final-echo",
        };
        f.write_str(name)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::NewEpoch { .. } => MessageKind::NewEpoch,
            Message::ObserveRequest { .. } => MessageKind::ObserveRequest,
            Message::Observe { .. } => MessageKind::Observe,
            Message::ReportRequest { .. } => MessageKind::ReportRequest,
            Message::Report { .. } => MessageKind::Report,
            Message::Final(_) => MessageKind::Final,
            Message::FinalEcho { .. } => MessageKind::FinalEcho,
        }
    }

    /// Epoch the message is tagged with
    pub fn epoch(&self) -> Epoch {
        match self {
            Message::NewEpoch { epoch }
            | Message::ObserveRequest { epoch, .. }
            | Message::Observe { epoch, .. }
            | Message::ReportRequest { epoch, .. }
            | Message::Report { epoch, .. } => *epoch,
            Message::Final(final_message) | Message::FinalEcho { final_message } => {
                final_message.epoch
            }
        }
    }

    /// Encode into an envelope for the transport
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bounded_bytes(self, MAX_MESSAGE_SIZE)
    }

    /// Decode an envelope received from the transport
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bounded_bytes(bytes, MAX_MESSAGE_SIZE)
    }
}
