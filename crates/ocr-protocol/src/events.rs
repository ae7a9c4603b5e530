use ocr_core::{Message, MessageFinal, MessageKind, OracleId};

use crate::net::Destination;

/// Consumes completed reports for external submission
pub trait ReportSink: Send + Sync {
    fn on_report(&self, report: &MessageFinal);
}

/// A message that failed validation
#[derive(Debug, Clone)]
pub struct AssertionViolation {
    pub from: OracleId,
    pub kind: MessageKind,
    pub reason: String,
}

/// Passive observer of traffic and violations.
///
/// Never influences protocol state.
pub trait TelemetrySink: Send + Sync {
    fn on_sent(&self, _to: Destination, _message: &Message) {}

    fn on_received(&self, _from: OracleId, _message: &Message) {}

    fn on_violation(&self, _violation: &AssertionViolation) {}
}

/// Telemetry sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {}
