//! Async driver for one [`Oracle`].
//!
//! The runner owns the state machine and is its only writer. Inbound
//! envelopes, timer firings and data source results are all funnelled into
//! one task and handled one at a time; the resulting actions are carried out
//! by spawning timers and fetches that report back over an internal channel.

use std::sync::Arc;
use std::time::Duration;

use ocr_core::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::events::{ReportSink, TelemetrySink};
use crate::net::{InboundMessage, Transport};
use crate::oracle::{Action, Event, Oracle};
use crate::source::DataSource;

/// Stops a running [`OracleRunner`] when triggered or dropped
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct OracleRunner<D: DataSource> {
    oracle: Oracle,
    transport: Arc<dyn Transport>,
    data_source: Arc<D>,
    report_sink: Arc<dyn ReportSink>,
    telemetry: Arc<dyn TelemetrySink>,
    data_source_timeout: Duration,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    shutdown_rx: oneshot::Receiver<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl<D: DataSource> OracleRunner<D> {
    pub fn new(
        oracle: Oracle,
        transport: Arc<dyn Transport>,
        data_source: Arc<D>,
        report_sink: Arc<dyn ReportSink>,
        telemetry: Arc<dyn TelemetrySink>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let data_source_timeout = oracle.config().data_source_timeout;

        OracleRunner {
            oracle,
            transport,
            data_source,
            report_sink,
            telemetry,
            data_source_timeout,
            inbound_rx,
            event_tx,
            event_rx,
            shutdown_rx,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Take the shutdown handle; only the first call returns one
    pub fn shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown_tx
            .take()
            .map(|tx| ShutdownHandle { tx: Some(tx) })
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// Run until shut down or until the inbound channel closes. Returns the
    /// state machine so its final state can be inspected.
    pub async fn run(mut self) -> Oracle {
        info!("Oracle {} running", self.oracle.oracle_id());

        let actions = self.oracle.start();
        self.process_actions(actions);

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(event) = self.event_rx.recv() => {
                    let actions = self.oracle.handle(event);
                    self.process_actions(actions);
                }

                inbound = self.inbound_rx.recv() => {
                    let Some(inbound) = inbound else {
                        info!("Inbound channel closed");
                        break;
                    };
                    self.on_inbound(inbound);
                }
            }
        }

        info!(
            "Oracle {} stopped in epoch {}",
            self.oracle.oracle_id(),
            self.oracle.epoch()
        );
        self.oracle
    }

    fn on_inbound(&mut self, inbound: InboundMessage) {
        let message = match Message::decode(&inbound.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable envelope from {}: {}", inbound.from, e);
                return;
            }
        };

        self.telemetry.on_received(inbound.from, &message);
        let actions = self.oracle.handle(Event::Message {
            from: inbound.from,
            message,
        });
        self.process_actions(actions);
    }

    fn process_actions(&self, actions: Vec<Action>) {
        for action in actions {
            self.process_action(action);
        }
    }

    fn process_action(&self, action: Action) {
        match action {
            Action::Send { to, message } => {
                self.telemetry.on_sent(to, &message);
                match message.encode() {
                    Ok(payload) => self.transport.send(to, payload),
                    Err(e) => error!("Failed to encode {}: {}", message.kind(), e),
                }
            }

            Action::SetTimer { timer, after } => {
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    sleep(after).await;
                    let _ = tx.send(Event::Timer(timer));
                });
            }

            Action::FetchObservation { context } => {
                let tx = self.event_tx.clone();
                let data_source = Arc::clone(&self.data_source);
                let limit = self.data_source_timeout;
                tokio::spawn(async move {
                    let value = match timeout(limit, data_source.fetch()).await {
                        Ok(Ok(value)) => Some(value),
                        Ok(Err(e)) => {
                            warn!("Data source failed for {}: {}", context, e);
                            None
                        }
                        Err(_) => {
                            warn!("Data source timed out for {}", context);
                            None
                        }
                    };
                    let _ = tx.send(Event::ObservationFetched { context, value });
                });
            }

            Action::Deliver(final_message) => {
                debug!(
                    "Delivering report for round {} of epoch {}",
                    final_message.round, final_message.epoch
                );
                self.report_sink.on_report(&final_message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Canonicalizer, MedianCanonicalizer, MedianReport};
    use crate::config::{ConfigContext, ProtocolConfig};
    use crate::events::NullTelemetry;
    use crate::net::Destination;
    use crate::source::DataSourceError;
    use ocr_core::{Committee, KeyPair, MessageFinal, ObservationValue, OracleId, OracleSigner};
    use std::sync::Mutex;

    struct ChannelTransport {
        from: OracleId,
        peers: Vec<mpsc::Sender<InboundMessage>>,
    }

    impl Transport for ChannelTransport {
        fn send(&self, to: Destination, payload: Vec<u8>) {
            let targets: Vec<&mpsc::Sender<InboundMessage>> = match to {
                Destination::Broadcast => self.peers.iter().collect(),
                Destination::To(id) => self.peers.get(id.index()).into_iter().collect(),
            };
            for peer in targets {
                let _ = peer.try_send(InboundMessage {
                    from: self.from,
                    payload: payload.clone(),
                });
            }
        }
    }

    struct FixedSource(i64);

    impl DataSource for FixedSource {
        async fn fetch(&self) -> Result<ObservationValue, DataSourceError> {
            Ok(ObservationValue::from_i64(self.0))
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        reports: Mutex<Vec<MessageFinal>>,
    }

    impl ReportSink for CollectingSink {
        fn on_report(&self, report: &MessageFinal) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn fast_config() -> ProtocolConfig {
        ProtocolConfig {
            delta_progress: Duration::from_secs(3),
            delta_resend: Duration::from_millis(300),
            delta_round: Duration::from_millis(400),
            delta_grace: Duration::from_millis(20),
            observation_timeout: Duration::from_millis(150),
            report_timeout: Duration::from_millis(150),
            data_source_timeout: Duration::from_millis(100),
            r_max: 50,
        }
    }

    #[tokio::test]
    async fn test_cluster_produces_reports() {
        let pairs: Vec<_> = (0..4).map(|i| KeyPair::deterministic("runner", i)).collect();
        let committee = Committee::new(pairs.iter().map(|p| p.public).collect());

        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel(1024);
            senders.push(tx);
            receivers.push(rx);
        }

        let mut sinks = Vec::new();
        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for (i, rx) in receivers.into_iter().enumerate() {
            let id = OracleId(i as u8);
            let ctx = ConfigContext::new(committee.clone(), 1, id, "runner").unwrap();
            let oracle = Oracle::new(
                Arc::new(ctx),
                fast_config(),
                OracleSigner::new(id, pairs[i].secret.clone()),
                Arc::new(MedianCanonicalizer),
                Arc::new(NullTelemetry),
            )
            .unwrap();
            let sink = Arc::new(CollectingSink::default());
            let transport = Arc::new(ChannelTransport {
                from: id,
                peers: senders.clone(),
            });
            let mut runner = OracleRunner::new(
                oracle,
                transport,
                Arc::new(FixedSource(100 + i as i64)),
                sink.clone(),
                Arc::new(NullTelemetry),
                rx,
            );
            handles.push(runner.shutdown_handle().unwrap());
            sinks.push(sink);
            tasks.push(tokio::spawn(runner.run()));
        }

        sleep(Duration::from_millis(1500)).await;
        for handle in handles {
            handle.shutdown();
        }
        for task in tasks {
            let oracle = task.await.unwrap();
            assert_eq!(oracle.epoch(), 1);
        }

        let first = sinks[0].reports.lock().unwrap().clone();
        assert!(!first.is_empty());
        for sink in &sinks {
            let reports = sink.reports.lock().unwrap();
            // Each oracle delivers every round at most once
            let mut keys: Vec<_> = reports.iter().map(|r| (r.epoch, r.round)).collect();
            let len = keys.len();
            keys.dedup();
            assert_eq!(keys.len(), len);
        }

        let body = MedianReport::decode(&{
            let values = &first[0].report.contract_report.values;
            MedianCanonicalizer.canonicalize(values).unwrap()
        })
        .unwrap();
        assert!((100..=103).contains(&body.median));
    }

    #[test]
    fn test_shutdown_handle_taken_once() {
        let pair = KeyPair::deterministic("runner", 0);
        let committee = Committee::new(
            (0..4)
                .map(|i| KeyPair::deterministic("runner", i).public)
                .collect(),
        );
        let ctx = ConfigContext::new(committee, 1, OracleId(0), "runner").unwrap();
        let oracle = Oracle::new(
            Arc::new(ctx),
            ProtocolConfig::default(),
            OracleSigner::new(OracleId(0), pair.secret),
            Arc::new(MedianCanonicalizer),
            Arc::new(NullTelemetry),
        )
        .unwrap();
        let (_tx, rx) = mpsc::channel(1);
        let mut runner = OracleRunner::new(
            oracle,
            Arc::new(ChannelTransport {
                from: OracleId(0),
                peers: Vec::new(),
            }),
            Arc::new(FixedSource(1)),
            Arc::new(CollectingSink::default()),
            Arc::new(NullTelemetry),
            rx,
        );

        assert!(runner.shutdown_handle().is_some());
        assert!(runner.shutdown_handle().is_none());
    }
}
