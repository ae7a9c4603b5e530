//! Follower roles: answering observe requests and co-signing reports.
//!
//! Every oracle, the leader included, runs these. A follower trusts nothing
//! the leader claims about a report: it re-checks every observation and
//! recomputes the canonical bytes itself before signing, and it signs at most
//! one report per round.

use std::sync::Arc;

use ocr_core::{
    ContractReport, Epoch, Message, Observation, ObservationValue, OracleId, OracleSigner,
    OracleValue, ReportingContext, Round,
};
use tracing::{debug, info};

use crate::canonical::Canonicalizer;
use crate::config::ConfigContext;
use crate::error::ProtocolError;
use crate::net::Destination;
use crate::oracle::Action;
use crate::quorum::check_report_values;

pub struct Follower {
    ctx: Arc<ConfigContext>,
    canonicalizer: Arc<dyn Canonicalizer>,
    signer: OracleSigner,
    r_max: u64,
    epoch: Epoch,
    round: Round,
    observed: bool,
    signed_report: bool,
}

impl Follower {
    pub fn new(
        ctx: Arc<ConfigContext>,
        canonicalizer: Arc<dyn Canonicalizer>,
        signer: OracleSigner,
        r_max: u64,
        epoch: Epoch,
    ) -> Self {
        Follower {
            ctx,
            canonicalizer,
            signer,
            r_max,
            epoch,
            round: 0,
            observed: false,
            signed_report: false,
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Forget all round state and follow a new epoch
    pub fn enter_epoch(&mut self, epoch: Epoch) {
        self.epoch = epoch;
        self.round = 0;
        self.observed = false;
        self.signed_report = false;
    }

    /// Skip ahead to a round that completed without us
    pub fn finish_round(&mut self, epoch: Epoch, round: Round) {
        if epoch == self.epoch && round >= self.round {
            self.round = round;
            self.observed = true;
            self.signed_report = true;
        }
    }

    fn check_leader(&self, from: OracleId) -> Result<OracleId, ProtocolError> {
        let leader = self.ctx.leader(self.epoch);
        if from != leader {
            return Err(ProtocolError::WrongLeader {
                epoch: self.epoch,
                expected: leader,
                got: from,
            });
        }
        Ok(leader)
    }

    fn check_round_limit(&self, round: Round) -> Result<(), ProtocolError> {
        if round > self.r_max {
            return Err(ProtocolError::RoundLimit {
                round,
                max: self.r_max,
            });
        }
        Ok(())
    }

    pub fn on_observe_request(
        &mut self,
        from: OracleId,
        epoch: Epoch,
        round: Round,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        if epoch != self.epoch || round <= self.round {
            debug!("Dropping observe request e{}/r{} from {}", epoch, round, from);
            return Ok(());
        }
        self.check_leader(from)?;
        self.check_round_limit(round)?;

        self.round = round;
        self.observed = false;
        self.signed_report = false;

        out.push(Action::FetchObservation {
            context: self.ctx.reporting_context(epoch, round),
        });
        Ok(())
    }

    /// Data source answered (or gave up) for `context`
    pub fn on_observation_fetched(
        &mut self,
        context: ReportingContext,
        value: Option<ObservationValue>,
        out: &mut Vec<Action>,
    ) {
        if context != self.ctx.reporting_context(self.epoch, self.round) || self.observed {
            debug!("Discarding fetch result for superseded {}", context);
            return;
        }

        let Some(value) = value else {
            info!("Abstaining from round {} of epoch {}: no reading", self.round, self.epoch);
            return;
        };

        self.observed = true;
        let observation = self.signer.sign_observation(&context, value);
        out.push(Action::Send {
            to: Destination::To(self.ctx.leader(self.epoch)),
            message: Message::Observe {
                epoch: self.epoch,
                round: self.round,
                observation,
            },
        });
    }

    pub fn on_report_request(
        &mut self,
        from: OracleId,
        epoch: Epoch,
        round: Round,
        observations: Vec<Observation>,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        if epoch != self.epoch || round < self.round {
            debug!("Dropping report request e{}/r{} from {}", epoch, round, from);
            return Ok(());
        }
        let leader = self.check_leader(from)?;
        self.check_round_limit(round)?;

        if round == self.round && self.signed_report {
            debug!("Already signed a report for round {}", round);
            return Ok(());
        }

        if let Some(foreign) = observations
            .iter()
            .map(|o| o.context.config_digest)
            .find(|d| *d != self.ctx.config_digest)
        {
            debug!("Dropping report request carrying foreign config {} from {}", foreign, from);
            return Ok(());
        }

        let context = self.ctx.reporting_context(epoch, round);
        let values = self.validate_observations(&context, &observations)?;
        let report_bytes = self.canonicalizer.canonicalize(&values)?;

        if round > self.round {
            // Missed the observe request; too late to contribute a reading
            self.round = round;
            self.observed = true;
        }
        self.signed_report = true;

        let contract_report = ContractReport {
            context,
            signature: self.signer.sign_report(&context, &report_bytes),
            values,
        };

        debug!("Signed report for round {} of epoch {}", round, epoch);

        out.push(Action::Send {
            to: Destination::To(leader),
            message: Message::Report {
                epoch,
                round,
                contract_report,
            },
        });
        Ok(())
    }

    /// Re-check an observation list exactly as the leader should have built
    /// it: a quorum of distinct oracles in id order, all signed for `context`
    fn validate_observations(
        &self,
        context: &ReportingContext,
        observations: &[Observation],
    ) -> Result<Vec<OracleValue>, ProtocolError> {
        let values: Vec<OracleValue> = observations.iter().map(Observation::to_oracle_value).collect();
        check_report_values(&values, &self.ctx)?;

        for observation in observations {
            if observation.context != *context {
                return Err(ProtocolError::ContextMismatch {
                    expected: *context,
                    got: observation.context,
                });
            }
            self.ctx.committee.verify_observation(observation)?;
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::MedianCanonicalizer;
    use ocr_core::{Committee, ConfigDigest, KeyPair};

    struct Fixture {
        ctx: Arc<ConfigContext>,
        signers: Vec<OracleSigner>,
        leader: OracleId,
        follower: Follower,
    }

    fn fixture() -> Fixture {
        let pairs: Vec<_> = (0..4).map(|i| KeyPair::deterministic("follower", i)).collect();
        let committee = Committee::new(pairs.iter().map(|p| p.public).collect());
        let probe = ConfigContext::new(committee.clone(), 1, OracleId(0), "follower").unwrap();
        let leader = probe.leader(1);
        // Act as some oracle other than the leader
        let me = OracleId((leader.0 + 1) % 4);
        let ctx = Arc::new(ConfigContext::new(committee, 1, me, "follower").unwrap());

        let signers: Vec<_> = pairs
            .into_iter()
            .enumerate()
            .map(|(i, p)| OracleSigner::new(OracleId(i as u8), p.secret))
            .collect();
        let follower = Follower::new(
            Arc::clone(&ctx),
            Arc::new(MedianCanonicalizer),
            signers[me.index()].clone(),
            10,
            1,
        );

        Fixture {
            ctx,
            signers,
            leader,
            follower,
        }
    }

    fn observations(fx: &Fixture, round: Round, ids: &[usize]) -> Vec<Observation> {
        let context = fx.ctx.reporting_context(1, round);
        ids.iter()
            .map(|id| {
                fx.signers[*id].sign_observation(&context, ObservationValue::from_i64(*id as i64 * 10))
            })
            .collect()
    }

    fn sent_reports(out: &[Action]) -> Vec<ContractReport> {
        out.iter()
            .filter_map(|a| match a {
                Action::Send {
                    message: Message::Report { contract_report, .. },
                    ..
                } => Some(contract_report.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_observe_request_triggers_fetch_then_reply() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;

        fx.follower
            .on_observe_request(leader, 1, 1, &mut out)
            .unwrap();
        let context = fx.ctx.reporting_context(1, 1);
        assert!(matches!(out[0], Action::FetchObservation { context: c } if c == context));

        out.clear();
        fx.follower
            .on_observation_fetched(context, Some(ObservationValue::from_i64(5)), &mut out);
        assert!(matches!(
            &out[0],
            Action::Send { to: Destination::To(to), message: Message::Observe { .. } } if *to == leader
        ));

        // Only one answer per round
        out.clear();
        fx.follower
            .on_observation_fetched(context, Some(ObservationValue::from_i64(6)), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_fetch_failure_abstains() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;
        fx.follower.on_observe_request(leader, 1, 1, &mut out).unwrap();

        out.clear();
        fx.follower
            .on_observation_fetched(fx.ctx.reporting_context(1, 1), None, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_observe_request_from_non_leader_rejected() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let impostor = OracleId((fx.leader.0 + 2) % 4);

        assert!(matches!(
            fx.follower.on_observe_request(impostor, 1, 1, &mut out),
            Err(ProtocolError::WrongLeader { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_signs_valid_request_once() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;
        let obs = observations(&fx, 1, &[0, 1, 2, 3]);

        fx.follower
            .on_report_request(leader, 1, 1, obs.clone(), &mut out)
            .unwrap();
        let reports = sent_reports(&out);
        assert_eq!(reports.len(), 1);

        let bytes = MedianCanonicalizer
            .canonicalize(&reports[0].values)
            .unwrap();
        fx.ctx
            .committee
            .verify_report(fx.ctx.oracle_id, &reports[0].context, &bytes, &reports[0].signature)
            .unwrap();

        // A second, different request for the same round is not signed
        out.clear();
        let fewer = observations(&fx, 1, &[0, 1, 2]);
        fx.follower
            .on_report_request(leader, 1, 1, fewer, &mut out)
            .unwrap();
        assert!(sent_reports(&out).is_empty());
    }

    #[test]
    fn test_foreign_config_request_dropped_quietly() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;

        let foreign = ReportingContext::new(ConfigDigest([0xee; 16]), 1, 1);
        let mut obs = observations(&fx, 1, &[0, 1, 2]);
        obs[1] = fx.signers[1].sign_observation(&foreign, ObservationValue::from_i64(10));
        fx.follower
            .on_report_request(leader, 1, 1, obs, &mut out)
            .unwrap();
        assert!(sent_reports(&out).is_empty());

        // Nothing was signed, so a genuine request is still answered
        let obs = observations(&fx, 1, &[0, 1, 2]);
        fx.follower
            .on_report_request(leader, 1, 1, obs, &mut out)
            .unwrap();
        assert_eq!(sent_reports(&out).len(), 1);
    }

    #[test]
    fn test_rejects_unsorted_or_short_lists() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;

        let short = observations(&fx, 1, &[0, 1]);
        assert!(fx
            .follower
            .on_report_request(leader, 1, 1, short, &mut out)
            .is_err());

        let unsorted = observations(&fx, 1, &[2, 0, 1]);
        assert!(fx
            .follower
            .on_report_request(leader, 1, 1, unsorted, &mut out)
            .is_err());

        let repeated = observations(&fx, 1, &[0, 1, 1]);
        assert!(fx
            .follower
            .on_report_request(leader, 1, 1, repeated, &mut out)
            .is_err());

        assert!(sent_reports(&out).is_empty());
    }

    #[test]
    fn test_rejects_forged_or_foreign_observations() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;

        let mut forged = observations(&fx, 1, &[0, 1, 2]);
        forged[1].value = ObservationValue::from_i64(1_000_000);
        assert!(matches!(
            fx.follower.on_report_request(leader, 1, 1, forged, &mut out),
            Err(ProtocolError::Core(_))
        ));

        let other_round = observations(&fx, 2, &[0, 1, 2]);
        assert!(matches!(
            fx.follower.on_report_request(leader, 1, 1, other_round, &mut out),
            Err(ProtocolError::ContextMismatch { .. })
        ));

        assert!(sent_reports(&out).is_empty());
    }

    #[test]
    fn test_stale_requests_dropped() {
        let mut fx = fixture();
        let mut out = Vec::new();
        let leader = fx.leader;

        fx.follower.on_observe_request(leader, 1, 3, &mut out).unwrap();
        out.clear();

        fx.follower.on_observe_request(leader, 1, 2, &mut out).unwrap();
        let obs = observations(&fx, 2, &[0, 1, 2]);
        fx.follower
            .on_report_request(leader, 1, 2, obs, &mut out)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(fx.follower.round(), 3);
    }
}
