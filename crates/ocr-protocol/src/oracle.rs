//! The per-oracle state machine.
//!
//! [`Oracle`] wires the epoch coordinator, the follower roles, the final
//! propagator and (while this oracle leads) the round driver together. It
//! performs no I/O: every input arrives as an [`Event`] and every effect
//! leaves as an [`Action`], which keeps the protocol testable without a
//! network or a clock.

use std::sync::Arc;
use std::time::Duration;

use ocr_core::{
    Epoch, Message, MessageFinal, MessageKind, ObservationValue, OracleId, OracleSigner,
    ReportingContext, Round,
};
use tracing::{debug, warn};

use crate::canonical::Canonicalizer;
use crate::config::{ConfigContext, ProtocolConfig};
use crate::error::ProtocolError;
use crate::events::{AssertionViolation, TelemetrySink};
use crate::follower::Follower;
use crate::net::Destination;
use crate::pacemaker::EpochCoordinator;
use crate::propagator::FinalPropagator;
use crate::round::RoundDriver;

/// Timers are tagged with the state they were armed for so that a firing
/// that outlived its epoch, round or generation can be ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    Progress { epoch: Epoch, generation: u64 },
    Resend { epoch: Epoch },
    RoundInterval { epoch: Epoch, round: Round },
    ObservationGrace { epoch: Epoch, round: Round },
    ObservationTimeout { epoch: Epoch, round: Round },
    ReportTimeout { epoch: Epoch, round: Round },
}

/// Effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send { to: Destination, message: Message },
    SetTimer { timer: TimerId, after: Duration },
    /// Ask the data source for a reading; answered with
    /// [`Event::ObservationFetched`]
    FetchObservation { context: ReportingContext },
    /// Hand a completed report to the report sink
    Deliver(MessageFinal),
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message { from: OracleId, message: Message },
    Timer(TimerId),
    /// `value` is `None` when the data source failed or timed out
    ObservationFetched {
        context: ReportingContext,
        value: Option<ObservationValue>,
    },
}

pub struct Oracle {
    ctx: Arc<ConfigContext>,
    config: ProtocolConfig,
    signer: OracleSigner,
    canonicalizer: Arc<dyn Canonicalizer>,
    telemetry: Arc<dyn TelemetrySink>,
    pacemaker: EpochCoordinator,
    follower: Follower,
    propagator: FinalPropagator,
    driver: Option<RoundDriver>,
}

impl Oracle {
    pub fn new(
        ctx: Arc<ConfigContext>,
        config: ProtocolConfig,
        signer: OracleSigner,
        canonicalizer: Arc<dyn Canonicalizer>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ProtocolError> {
        config.sanity_check()?;

        if signer.oracle_id() != ctx.oracle_id {
            return Err(ProtocolError::InvalidConfig(format!(
                "signer is {} but context is for {}",
                signer.oracle_id(),
                ctx.oracle_id
            )));
        }
        if *ctx.committee.public_key(ctx.oracle_id)? != signer.public_key() {
            return Err(ProtocolError::InvalidConfig(format!(
                "signing key does not match committee entry for {}",
                ctx.oracle_id
            )));
        }

        let pacemaker =
            EpochCoordinator::new(Arc::clone(&ctx), config.delta_progress, config.delta_resend);
        let follower = Follower::new(
            Arc::clone(&ctx),
            Arc::clone(&canonicalizer),
            signer.clone(),
            config.r_max,
            pacemaker.epoch(),
        );
        let propagator = FinalPropagator::new(Arc::clone(&ctx), Arc::clone(&canonicalizer));

        Ok(Oracle {
            ctx,
            config,
            signer,
            canonicalizer,
            telemetry,
            pacemaker,
            follower,
            propagator,
            driver: None,
        })
    }

    pub fn oracle_id(&self) -> OracleId {
        self.ctx.oracle_id
    }

    pub fn context(&self) -> &ConfigContext {
        &self.ctx
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn epoch(&self) -> Epoch {
        self.pacemaker.epoch()
    }

    /// Highest round this oracle has taken part in during the current epoch
    pub fn round(&self) -> Round {
        match &self.driver {
            Some(driver) => driver.round().max(self.follower.round()),
            None => self.follower.round(),
        }
    }

    pub fn leader(&self) -> OracleId {
        self.pacemaker.leader()
    }

    pub fn is_leader(&self) -> bool {
        self.pacemaker.is_leader()
    }

    /// (epoch, round) of the newest report delivered
    pub fn highest_final(&self) -> Option<(Epoch, Round)> {
        self.propagator.highest()
    }

    /// Arm the initial timers and, if this oracle leads the first epoch,
    /// open its first round
    pub fn start(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        self.pacemaker.start(&mut out);
        self.enter_epoch(self.pacemaker.epoch(), &mut out);
        out
    }

    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut out = Vec::new();
        match event {
            Event::Message { from, message } => self.on_message(from, message, &mut out),
            Event::Timer(timer) => self.on_timer(timer, &mut out),
            Event::ObservationFetched { context, value } => {
                self.follower.on_observation_fetched(context, value, &mut out)
            }
        }
        out
    }

    fn enter_epoch(&mut self, epoch: Epoch, out: &mut Vec<Action>) {
        self.follower.enter_epoch(epoch);

        if self.pacemaker.is_leader() {
            let mut driver = RoundDriver::new(
                Arc::clone(&self.ctx),
                self.config.clone(),
                Arc::clone(&self.canonicalizer),
                self.signer.clone(),
                epoch,
            );
            driver.start_next_round(out);
            self.driver = Some(driver);
        } else {
            self.driver = None;
        }
    }

    fn on_message(&mut self, from: OracleId, message: Message, out: &mut Vec<Action>) {
        if !self.ctx.committee.contains(from) {
            debug!("Dropping {} from unknown {}", message.kind(), from);
            return;
        }

        let kind = message.kind();
        let result = match message {
            Message::NewEpoch { epoch } => {
                if let Some(adopted) = self.pacemaker.on_new_epoch(from, epoch, out) {
                    self.enter_epoch(adopted, out);
                }
                Ok(())
            }
            Message::ObserveRequest { epoch, round } => {
                self.follower.on_observe_request(from, epoch, round, out)
            }
            Message::Observe {
                epoch,
                round,
                observation,
            } => match self.driver.as_mut() {
                Some(driver) => driver.on_observation(from, epoch, round, observation, out),
                None => {
                    debug!("Not leading, dropping observation from {}", from);
                    Ok(())
                }
            },
            Message::ReportRequest {
                epoch,
                round,
                observations,
            } => self
                .follower
                .on_report_request(from, epoch, round, observations, out),
            Message::Report {
                epoch,
                round,
                contract_report,
            } => match self.driver.as_mut() {
                Some(driver) => driver.on_report(from, epoch, round, contract_report, out),
                None => {
                    debug!("Not leading, dropping report from {}", from);
                    Ok(())
                }
            },
            Message::Final(final_message) | Message::FinalEcho { final_message } => {
                self.on_final(from, final_message, out)
            }
        };

        if let Err(e) = result {
            self.report_violation(from, kind, e);
        }
    }

    fn on_final(
        &mut self,
        from: OracleId,
        final_message: MessageFinal,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        let Some((epoch, round)) = self.propagator.on_final(from, final_message, out)? else {
            return Ok(());
        };

        let current = self.pacemaker.epoch();
        if epoch > current {
            // A quorum signed in that epoch, so at least f+1 honest oracles
            // are already there
            if self.pacemaker.advance_to(epoch, out) {
                self.enter_epoch(epoch, out);
            }
        } else if epoch == current {
            self.pacemaker.record_progress(out);
        }
        self.follower.finish_round(epoch, round);
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerId, out: &mut Vec<Action>) {
        let result = match timer {
            TimerId::Progress { epoch, generation } => {
                self.pacemaker.on_progress_timeout(epoch, generation, out);
                Ok(())
            }
            TimerId::Resend { epoch } => {
                self.pacemaker.on_resend_timeout(epoch, out);
                Ok(())
            }
            TimerId::RoundInterval { epoch, round } => {
                if let Some(driver) = self.driver.as_mut() {
                    driver.on_round_interval(epoch, round, out);
                }
                Ok(())
            }
            TimerId::ObservationGrace { epoch, round } => match self.driver.as_mut() {
                Some(driver) => driver.on_grace_timeout(epoch, round, out),
                None => Ok(()),
            },
            TimerId::ObservationTimeout { epoch, round } => match self.driver.as_mut() {
                Some(driver) => driver.on_observation_timeout(epoch, round, out),
                None => Ok(()),
            },
            TimerId::ReportTimeout { epoch, round } => {
                if let Some(driver) = self.driver.as_mut() {
                    driver.on_report_timeout(epoch, round);
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Round step failed on {:?}: {}", timer, e);
        }
    }

    fn report_violation(&self, from: OracleId, kind: MessageKind, error: ProtocolError) {
        warn!("Rejected {} from {}: {}", kind, from, error);
        self.telemetry.on_violation(&AssertionViolation {
            from,
            kind,
            reason: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::MedianCanonicalizer;
    use crate::events::NullTelemetry;
    use ocr_core::{Committee, KeyPair};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTelemetry {
        violations: Mutex<Vec<AssertionViolation>>,
    }

    impl TelemetrySink for RecordingTelemetry {
        fn on_violation(&self, violation: &AssertionViolation) {
            self.violations.lock().unwrap().push(violation.clone());
        }
    }

    fn pairs() -> Vec<KeyPair> {
        (0..4).map(|i| KeyPair::deterministic("oracle", i)).collect()
    }

    fn build(id: u8, telemetry: Arc<dyn TelemetrySink>) -> Oracle {
        let pairs = pairs();
        let committee = Committee::new(pairs.iter().map(|p| p.public).collect());
        let ctx = ConfigContext::new(committee, 1, OracleId(id), "oracle").unwrap();
        let signer = OracleSigner::new(OracleId(id), pairs[id as usize].secret.clone());
        Oracle::new(
            Arc::new(ctx),
            ProtocolConfig::default(),
            signer,
            Arc::new(MedianCanonicalizer),
            telemetry,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_foreign_signing_key() {
        let pairs = pairs();
        let committee = Committee::new(pairs.iter().map(|p| p.public).collect());
        let ctx = ConfigContext::new(committee, 1, OracleId(0), "oracle").unwrap();
        let signer = OracleSigner::new(OracleId(0), pairs[1].secret.clone());

        let result = Oracle::new(
            Arc::new(ctx),
            ProtocolConfig::default(),
            signer,
            Arc::new(MedianCanonicalizer),
            Arc::new(NullTelemetry),
        );
        assert!(matches!(result, Err(ProtocolError::InvalidConfig(_))));
    }

    #[test]
    fn test_leader_opens_first_round() {
        let leader = build(0, Arc::new(NullTelemetry)).leader();
        let mut oracle = build(leader.0, Arc::new(NullTelemetry));
        let out = oracle.start();

        assert!(oracle.is_leader());
        assert!(out.iter().any(|a| matches!(
            a,
            Action::Send {
                to: Destination::Broadcast,
                message: Message::ObserveRequest { epoch: 1, round: 1 },
            }
        )));
        assert!(out.iter().any(|a| matches!(
            a,
            Action::SetTimer {
                timer: TimerId::Progress { epoch: 1, .. },
                ..
            }
        )));
    }

    #[test]
    fn test_follower_only_arms_progress_timer() {
        let leader = build(0, Arc::new(NullTelemetry)).leader();
        let mut oracle = build((leader.0 + 1) % 4, Arc::new(NullTelemetry));
        let out = oracle.start();

        assert!(!oracle.is_leader());
        assert_eq!(out.len(), 1);
        assert_eq!(oracle.epoch(), 1);
    }

    #[test]
    fn test_unknown_sender_dropped() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let mut oracle = build(0, telemetry.clone());
        oracle.start();

        let out = oracle.handle(Event::Message {
            from: OracleId(9),
            message: Message::ObserveRequest { epoch: 1, round: 1 },
        });
        assert!(out.is_empty());
        assert!(telemetry.violations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_observe_request_from_non_leader_is_violation() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let probe = build(0, Arc::new(NullTelemetry));
        let leader = probe.leader();
        let impostor = OracleId((leader.0 + 1) % 4);
        let me = OracleId((leader.0 + 2) % 4);

        let mut oracle = build(me.0, telemetry.clone());
        oracle.start();
        let out = oracle.handle(Event::Message {
            from: impostor,
            message: Message::ObserveRequest { epoch: 1, round: 1 },
        });

        assert!(out.is_empty());
        let violations = telemetry.violations.lock().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].from, impostor);
        assert_eq!(violations[0].kind, MessageKind::ObserveRequest);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut oracle = build(0, Arc::new(NullTelemetry));
        oracle.start();

        let out = oracle.handle(Event::Timer(TimerId::Progress {
            epoch: 1,
            generation: 99,
        }));
        assert!(out.is_empty());
        assert_eq!(oracle.epoch(), 1);
    }
}
