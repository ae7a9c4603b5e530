//! The leader's side of a reporting round.
//!
//! A round moves through observation collection, report signature
//! collection, and final assembly. Each collection phase is bounded by its own
//! timer; a phase that runs out of time abandons the round without output and
//! the next round (or the next epoch) retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use ocr_core::{
    ContractReport, ContractReportWithSignatures, Epoch, Message, MessageFinal, Observation,
    OracleId, OracleSigner, OracleValue, ReportingContext, Round,
};
use tracing::{debug, info, warn};

use crate::canonical::Canonicalizer;
use crate::config::{ConfigContext, ProtocolConfig};
use crate::error::ProtocolError;
use crate::net::Destination;
use crate::oracle::{Action, TimerId};
use crate::quorum::ReportQuorum;

enum Phase {
    Idle,
    Observing {
        observations: BTreeMap<OracleId, Observation>,
        grace_started: bool,
    },
    Reporting {
        values: Vec<OracleValue>,
        quorum: ReportQuorum,
    },
    Finished,
    Aborted,
}

pub struct RoundDriver {
    ctx: Arc<ConfigContext>,
    config: ProtocolConfig,
    canonicalizer: Arc<dyn Canonicalizer>,
    signer: OracleSigner,
    epoch: Epoch,
    round: Round,
    phase: Phase,
}

impl RoundDriver {
    pub fn new(
        ctx: Arc<ConfigContext>,
        config: ProtocolConfig,
        canonicalizer: Arc<dyn Canonicalizer>,
        signer: OracleSigner,
        epoch: Epoch,
    ) -> Self {
        RoundDriver {
            ctx,
            config,
            canonicalizer,
            signer,
            epoch,
            round: 0,
            phase: Phase::Idle,
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.phase, Phase::Aborted)
    }

    /// Observations recorded so far in the current round
    pub fn observation_count(&self) -> usize {
        match &self.phase {
            Phase::Observing { observations, .. } => observations.len(),
            _ => 0,
        }
    }

    fn context(&self) -> ReportingContext {
        self.ctx.reporting_context(self.epoch, self.round)
    }

    fn is_current(&self, epoch: Epoch, round: Round) -> bool {
        epoch == self.epoch && round == self.round
    }

    /// Start the next round, superseding whatever the current one is doing.
    /// Returns false once the per-epoch round limit is exhausted.
    pub fn start_next_round(&mut self, out: &mut Vec<Action>) -> bool {
        if self.round >= self.config.r_max {
            info!(
                "Round limit {} reached in epoch {}, waiting for a new epoch",
                self.config.r_max, self.epoch
            );
            self.phase = Phase::Idle;
            return false;
        }

        self.round += 1;
        self.phase = Phase::Observing {
            observations: BTreeMap::new(),
            grace_started: false,
        };

        info!("Leading round {} of epoch {}", self.round, self.epoch);

        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::ObserveRequest {
                epoch: self.epoch,
                round: self.round,
            },
        });
        out.push(Action::SetTimer {
            timer: TimerId::ObservationTimeout {
                epoch: self.epoch,
                round: self.round,
            },
            after: self.config.observation_timeout,
        });
        out.push(Action::SetTimer {
            timer: TimerId::RoundInterval {
                epoch: self.epoch,
                round: self.round,
            },
            after: self.config.delta_round,
        });
        true
    }

    pub fn on_round_interval(&mut self, epoch: Epoch, round: Round, out: &mut Vec<Action>) {
        if self.is_current(epoch, round) {
            self.start_next_round(out);
        }
    }

    pub fn on_observation(
        &mut self,
        from: OracleId,
        epoch: Epoch,
        round: Round,
        observation: Observation,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        if !self.is_current(epoch, round) {
            debug!("Dropping observation for e{}/r{} from {}", epoch, round, from);
            return Ok(());
        }

        let context = self.context();
        let n = self.ctx.n;
        let quorum = self.ctx.quorum();

        let Phase::Observing {
            observations,
            grace_started,
        } = &mut self.phase
        else {
            debug!("Late observation from {} in round {}", from, round);
            return Ok(());
        };

        if observation.context.config_digest != self.ctx.config_digest {
            debug!(
                "Dropping observation for foreign config {} from {}",
                observation.context.config_digest, from
            );
            return Ok(());
        }
        if observation.oracle_id != from {
            return Err(ProtocolError::SenderMismatch {
                sender: from,
                claimed: observation.oracle_id,
            });
        }
        if observation.context != context {
            return Err(ProtocolError::ContextMismatch {
                expected: context,
                got: observation.context,
            });
        }
        if observations.contains_key(&from) {
            debug!("Duplicate observation from {}", from);
            return Ok(());
        }

        self.ctx.committee.verify_observation(&observation)?;
        observations.insert(from, observation);

        debug!(
            "Recorded observation from {}, total: {}/{}",
            from,
            observations.len(),
            quorum
        );

        if observations.len() == n {
            return self.request_reports(out);
        }
        if observations.len() >= quorum && !*grace_started {
            *grace_started = true;
            out.push(Action::SetTimer {
                timer: TimerId::ObservationGrace { epoch, round },
                after: self.config.delta_grace,
            });
        }

        Ok(())
    }

    pub fn on_grace_timeout(&mut self, epoch: Epoch, round: Round, out: &mut Vec<Action>) -> Result<(), ProtocolError> {
        if self.is_current(epoch, round) && matches!(self.phase, Phase::Observing { .. }) {
            return self.request_reports(out);
        }
        Ok(())
    }

    pub fn on_observation_timeout(
        &mut self,
        epoch: Epoch,
        round: Round,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        if !self.is_current(epoch, round) {
            return Ok(());
        }

        let count = match &self.phase {
            Phase::Observing { observations, .. } => observations.len(),
            _ => return Ok(()),
        };

        if count >= self.ctx.quorum() {
            return self.request_reports(out);
        }

        info!(
            "Round {} of epoch {} aborted: {}/{} observations",
            round,
            epoch,
            count,
            self.ctx.quorum()
        );
        self.phase = Phase::Aborted;
        Ok(())
    }

    fn request_reports(&mut self, out: &mut Vec<Action>) -> Result<(), ProtocolError> {
        let observations = match std::mem::replace(&mut self.phase, Phase::Aborted) {
            Phase::Observing { observations, .. } => observations,
            other => {
                self.phase = other;
                return Ok(());
            }
        };

        let observations: Vec<Observation> = observations.into_values().collect();
        let values: Vec<OracleValue> = observations.iter().map(Observation::to_oracle_value).collect();

        // Phase stays Aborted if the values cannot be aggregated
        let report_bytes = self.canonicalizer.canonicalize(&values)?;
        let quorum = ReportQuorum::new(Arc::clone(&self.ctx), self.context(), report_bytes);

        debug!(
            "Requesting reports over {} observations for round {}",
            observations.len(),
            self.round
        );

        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::ReportRequest {
                epoch: self.epoch,
                round: self.round,
                observations,
            },
        });
        out.push(Action::SetTimer {
            timer: TimerId::ReportTimeout {
                epoch: self.epoch,
                round: self.round,
            },
            after: self.config.report_timeout,
        });

        self.phase = Phase::Reporting { values, quorum };
        Ok(())
    }

    pub fn on_report(
        &mut self,
        from: OracleId,
        epoch: Epoch,
        round: Round,
        contract_report: ContractReport,
        out: &mut Vec<Action>,
    ) -> Result<(), ProtocolError> {
        if !self.is_current(epoch, round) {
            debug!("Dropping report for e{}/r{} from {}", epoch, round, from);
            return Ok(());
        }

        let context = self.context();
        let Phase::Reporting { values, quorum } = &mut self.phase else {
            debug!("Report from {} outside of report collection", from);
            return Ok(());
        };

        if !contract_report.same_body_as(&context, values) {
            return Err(ProtocolError::BodyMismatch(from));
        }

        if !quorum.add_signature(from, contract_report.signature)? {
            return Ok(());
        }

        let signatures = quorum.build()?;
        let signature = self.signer.sign_report(&context, quorum.report_bytes());
        let final_message = MessageFinal {
            epoch,
            leader: self.ctx.oracle_id,
            round,
            report: ContractReportWithSignatures {
                contract_report: ContractReport {
                    context,
                    values: values.clone(),
                    signature,
                },
                signatures,
            },
        };

        info!(
            "Assembled final for round {} of epoch {} with {} signatures",
            round,
            epoch,
            final_message.report.signatures.len()
        );

        self.phase = Phase::Finished;
        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::Final(final_message),
        });
        Ok(())
    }

    pub fn on_report_timeout(&mut self, epoch: Epoch, round: Round) {
        if !self.is_current(epoch, round) {
            return;
        }
        if let Phase::Reporting { quorum, .. } = &self.phase {
            warn!(
                "Round {} of epoch {} aborted: {}/{} report signatures",
                round,
                epoch,
                quorum.signature_count(),
                self.ctx.quorum()
            );
            self.phase = Phase::Aborted;
        }
    }
}
