use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use ocr_core::{Epoch, Message, MessageFinal, ObservationValue, OracleId, OracleSigner, Round};
use ocr_protocol::{
    AssertionViolation, Canonicalizer, DataSource, DataSourceError, Destination,
    MedianCanonicalizer, MedianReport, Oracle, OracleRunner, ReportSink, TelemetrySink,
};
use rand::Rng;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::network::LocalNetwork;

const INBOX_CAPACITY: usize = 4096;

/// Data source whose reading drifts by a bounded random step on every fetch
pub struct RandomWalkSource {
    value: tokio::sync::Mutex<i64>,
    max_step: i64,
}

impl RandomWalkSource {
    pub fn new(start: i64, max_step: i64) -> Self {
        RandomWalkSource {
            value: tokio::sync::Mutex::new(start),
            max_step,
        }
    }
}

impl DataSource for RandomWalkSource {
    async fn fetch(&self) -> Result<ObservationValue, DataSourceError> {
        let step = if self.max_step > 0 {
            rand::thread_rng().gen_range(-self.max_step..=self.max_step)
        } else {
            0
        };
        let mut value = self.value.lock().await;
        *value = value
            .checked_add(step)
            .ok_or_else(|| DataSourceError::Malformed("reading overflowed".to_string()))?;
        Ok(ObservationValue::from_i64(*value))
    }
}

/// A report as seen by one oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredReport {
    pub oracle_id: OracleId,
    pub epoch: Epoch,
    pub round: Round,
    pub median: i64,
    pub signers: usize,
}

/// Shared record of every delivered report
#[derive(Default)]
pub struct ReportLog {
    entries: Mutex<Vec<DeliveredReport>>,
}

impl ReportLog {
    pub fn entries(&self) -> Vec<DeliveredReport> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

/// Report sink that logs each report and appends it to a [`ReportLog`]
pub struct LoggingSink {
    oracle_id: OracleId,
    log: Arc<ReportLog>,
}

impl LoggingSink {
    pub fn new(oracle_id: OracleId, log: Arc<ReportLog>) -> Self {
        LoggingSink { oracle_id, log }
    }
}

impl ReportSink for LoggingSink {
    fn on_report(&self, report: &MessageFinal) {
        let values = &report.report.contract_report.values;
        let median = match MedianCanonicalizer
            .canonicalize(values)
            .and_then(|bytes| MedianReport::decode(&bytes))
        {
            Ok(body) => body.median,
            Err(e) => {
                warn!("{} got an undecodable report: {}", self.oracle_id, e);
                return;
            }
        };

        info!(
            "{} report e{}/r{}: median {} from {} observations",
            self.oracle_id,
            report.epoch,
            report.round,
            median,
            values.len()
        );

        if let Ok(mut entries) = self.log.entries.lock() {
            entries.push(DeliveredReport {
                oracle_id: self.oracle_id,
                epoch: report.epoch,
                round: report.round,
                median,
                signers: report.report.signatures.len(),
            });
        }
    }
}

/// Message and violation counters shared by all oracles
#[derive(Default)]
pub struct TrafficCounters {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub violations: AtomicU64,
}

impl TelemetrySink for TrafficCounters {
    fn on_sent(&self, _to: Destination, _message: &Message) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_received(&self, _from: OracleId, _message: &Message) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_violation(&self, _violation: &AssertionViolation) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct SimulationSummary {
    pub reports: Vec<DeliveredReport>,
    /// Epoch each running oracle ended in
    pub epochs: Vec<(OracleId, Epoch)>,
    pub sent: u64,
    pub received: u64,
    pub violations: u64,
}

impl SimulationSummary {
    pub fn reports_by(&self, oracle_id: OracleId) -> usize {
        self.reports
            .iter()
            .filter(|r| r.oracle_id == oracle_id)
            .count()
    }

    /// Whether every oracle that delivered a given round saw the same median
    pub fn consistent(&self) -> bool {
        let mut medians: BTreeMap<(Epoch, Round), i64> = BTreeMap::new();
        self.reports.iter().all(|r| {
            *medians.entry((r.epoch, r.round)).or_insert(r.median) == r.median
        })
    }

    /// Distinct rounds that produced a report anywhere
    pub fn rounds(&self) -> usize {
        let mut keys: Vec<_> = self.reports.iter().map(|r| (r.epoch, r.round)).collect();
        keys.sort_unstable();
        keys.dedup();
        keys.len()
    }
}

/// A whole committee running in one process over a [`LocalNetwork`]
pub struct Simulation {
    config: NodeConfig,
}

impl Simulation {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Simulation { config })
    }

    pub async fn run(&self, duration: Duration) -> Result<SimulationSummary> {
        let config = &self.config;
        let pairs = config.keypairs()?;
        let protocol = config.protocol_config();
        let sim = &config.simulation;

        let (network, receivers) = LocalNetwork::new(pairs.len(), INBOX_CAPACITY, sim.drop_rate);
        let log = Arc::new(ReportLog::default());
        let counters = Arc::new(TrafficCounters::default());
        let canonicalizer: Arc<dyn Canonicalizer> = Arc::new(MedianCanonicalizer);

        info!(
            "Simulating {} oracles (f={}) for {:?}, digest {}",
            pairs.len(),
            config.f,
            duration,
            config.digest()?
        );

        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for (i, (pair, inbound)) in pairs.into_iter().zip(receivers).enumerate() {
            let id = OracleId(i as u8);
            if sim.crashed.contains(&id.0) {
                info!("{} is crashed and will not start", id);
                continue;
            }

            let oracle = Oracle::new(
                Arc::new(config.context_for(id)?),
                protocol.clone(),
                OracleSigner::new(id, pair.secret),
                Arc::clone(&canonicalizer),
                counters.clone(),
            )?;
            let mut runner = OracleRunner::new(
                oracle,
                Arc::new(network.endpoint(id)),
                Arc::new(RandomWalkSource::new(sim.base_value, sim.max_step)),
                Arc::new(LoggingSink::new(id, Arc::clone(&log))),
                counters.clone(),
                inbound,
            );
            handles.push(
                runner
                    .shutdown_handle()
                    .ok_or_else(|| anyhow!("shutdown handle already taken"))?,
            );
            tasks.push(tokio::spawn(runner.run()));
        }

        tokio::time::sleep(duration).await;
        for handle in handles {
            handle.shutdown();
        }

        let mut epochs = Vec::new();
        for task in tasks {
            let oracle = task.await?;
            epochs.push((oracle.oracle_id(), oracle.epoch()));
        }

        Ok(SimulationSummary {
            reports: log.entries(),
            epochs,
            sent: counters.sent.load(Ordering::Relaxed),
            received: counters.received.load(Ordering::Relaxed),
            violations: counters.violations.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{generate_sample_config, TimingConfig};
    use ocr_core::KeyPair;

    fn fast_config() -> NodeConfig {
        let mut config = generate_sample_config(4, 1);
        config.oracle_keys = (0..4)
            .map(|i| KeyPair::deterministic("simulation", i).secret.to_hex())
            .collect();
        config.timing = TimingConfig {
            delta_progress_ms: 1_000,
            delta_resend_ms: 200,
            delta_round_ms: 250,
            delta_grace_ms: 20,
            observation_timeout_ms: 100,
            report_timeout_ms: 100,
            data_source_timeout_ms: 50,
            r_max: 100,
        };
        config
    }

    #[tokio::test]
    async fn test_random_walk_stays_within_steps() {
        let source = RandomWalkSource::new(50, 3);
        let mut last = 50;
        for _ in 0..20 {
            let value = source.fetch().await.unwrap().as_i64().unwrap();
            assert!((value - last).abs() <= 3);
            last = value;
        }
    }

    #[test]
    fn test_summary_detects_disagreement() {
        let report = |oracle: u8, median| DeliveredReport {
            oracle_id: OracleId(oracle),
            epoch: 1,
            round: 1,
            median,
            signers: 3,
        };
        let mut summary = SimulationSummary {
            reports: vec![report(0, 10), report(1, 10)],
            epochs: Vec::new(),
            sent: 0,
            received: 0,
            violations: 0,
        };
        assert!(summary.consistent());
        assert_eq!(summary.rounds(), 1);

        summary.reports.push(report(2, 11));
        assert!(!summary.consistent());
    }

    #[tokio::test]
    async fn test_simulation_produces_consistent_reports() {
        let sim = Simulation::new(fast_config()).unwrap();
        let summary = sim.run(Duration::from_millis(1_500)).await.unwrap();

        assert!(summary.rounds() > 0);
        assert!(summary.consistent());
        assert_eq!(summary.violations, 0);
        for i in 0..4 {
            assert!(summary.reports_by(OracleId(i)) > 0);
        }
        assert!(summary.reports.iter().all(|r| r.signers >= 3));
    }

    #[tokio::test]
    async fn test_simulation_survives_crashed_leader() {
        let mut config = fast_config();
        let leader = config.context_for(OracleId(0)).unwrap().leader(1);
        config.simulation.crashed = vec![leader.0];

        let sim = Simulation::new(config).unwrap();
        let summary = sim.run(Duration::from_millis(5_000)).await.unwrap();

        assert!(summary.rounds() > 0);
        assert!(summary.consistent());
        assert_eq!(summary.reports_by(leader), 0);
        assert!(summary.epochs.iter().all(|(_, epoch)| *epoch > 1));
    }
}
