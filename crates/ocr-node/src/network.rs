use std::sync::Arc;

use ocr_core::OracleId;
use ocr_protocol::{Destination, InboundMessage, Transport};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

/// In-process network connecting every oracle of a simulation.
///
/// Each oracle owns one inbound queue. Deliveries never block: a full or
/// closed queue loses the message, and `drop_rate` loses messages at random.
pub struct LocalNetwork {
    inboxes: Vec<mpsc::Sender<InboundMessage>>,
    drop_rate: f64,
}

impl LocalNetwork {
    pub fn new(
        n: usize,
        capacity: usize,
        drop_rate: f64,
    ) -> (Arc<Self>, Vec<mpsc::Receiver<InboundMessage>>) {
        let (inboxes, receivers): (Vec<_>, Vec<_>) =
            (0..n).map(|_| mpsc::channel(capacity)).unzip();
        (Arc::new(LocalNetwork { inboxes, drop_rate }), receivers)
    }

    /// Transport handle that sends as `from`
    pub fn endpoint(self: &Arc<Self>, from: OracleId) -> LocalTransport {
        LocalTransport {
            from,
            network: Arc::clone(self),
        }
    }

    fn deliver(&self, from: OracleId, to: OracleId, payload: Vec<u8>) {
        let Some(inbox) = self.inboxes.get(to.index()) else {
            debug!("No inbox for {}", to);
            return;
        };

        if self.drop_rate > 0.0 && rand::thread_rng().gen_bool(self.drop_rate) {
            debug!("Dropped message {} -> {}", from, to);
            return;
        }

        if let Err(e) = inbox.try_send(InboundMessage { from, payload }) {
            debug!("Delivery {} -> {} failed: {}", from, to, e);
        }
    }
}

pub struct LocalTransport {
    from: OracleId,
    network: Arc<LocalNetwork>,
}

impl Transport for LocalTransport {
    fn send(&self, to: Destination, payload: Vec<u8>) {
        match to {
            Destination::Broadcast => {
                for i in 0..self.network.inboxes.len() {
                    self.network
                        .deliver(self.from, OracleId(i as u8), payload.clone());
                }
            }
            Destination::To(target) => self.network.deliver(self.from, target, payload),
        }
    }
}
