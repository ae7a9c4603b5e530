use ocr_core::OracleId;

/// Where an outgoing envelope goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every committee member, the sender included
    Broadcast,
    To(OracleId),
}

/// An envelope as handed over by the transport.
///
/// `from` is authenticated by the transport; the payload is untrusted.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: OracleId,
    pub payload: Vec<u8>,
}

/// Outbound half of the point-to-point network.
///
/// Delivery is best effort: messages may be lost, duplicated or reordered.
pub trait Transport: Send + Sync {
    fn send(&self, to: Destination, payload: Vec<u8>);
}
