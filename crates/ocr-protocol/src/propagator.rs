use std::sync::Arc;

use ocr_core::{Epoch, Message, MessageFinal, OracleId, Round};
use tracing::{debug, info};

use crate::canonical::Canonicalizer;
use crate::config::ConfigContext;
use crate::error::ProtocolError;
use crate::net::Destination;
use crate::oracle::Action;
use crate::quorum::verify_report_quorum;

/// Validates, echoes and delivers final reports.
///
/// A final is handled at most once per (epoch, round) and only if it is newer
/// than the last one delivered, so each report is echoed exactly once (one
/// hop) and reaches the report sink exactly once.
pub struct FinalPropagator {
    ctx: Arc<ConfigContext>,
    canonicalizer: Arc<dyn Canonicalizer>,
    highest: Option<(Epoch, Round)>,
}

impl FinalPropagator {
    pub fn new(ctx: Arc<ConfigContext>, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        FinalPropagator {
            ctx,
            canonicalizer,
            highest: None,
        }
    }

    /// (epoch, round) of the newest final delivered
    pub fn highest(&self) -> Option<(Epoch, Round)> {
        self.highest
    }

    /// Check a final independently of the transport that carried it
    pub fn validate(&self, final_message: &MessageFinal) -> Result<(), ProtocolError> {
        let context = final_message.context();
        let expected = self
            .ctx
            .reporting_context(final_message.epoch, final_message.round);
        if *context != expected {
            return Err(ProtocolError::ContextMismatch {
                expected,
                got: *context,
            });
        }

        let leader = self.ctx.leader(final_message.epoch);
        if final_message.leader != leader {
            return Err(ProtocolError::WrongLeader {
                epoch: final_message.epoch,
                expected: leader,
                got: final_message.leader,
            });
        }

        let report_bytes =
            verify_report_quorum(&final_message.report, &self.ctx, self.canonicalizer.as_ref())?;

        // The embedded report carries the leader's own signature
        let contract_report = &final_message.report.contract_report;
        self.ctx.committee.verify_report(
            leader,
            &contract_report.context,
            &report_bytes,
            &contract_report.signature,
        )?;
        Ok(())
    }

    /// Handle a final or an echoed final. Returns the (epoch, round) it
    /// completed if it was accepted.
    pub fn on_final(
        &mut self,
        from: OracleId,
        final_message: MessageFinal,
        out: &mut Vec<Action>,
    ) -> Result<Option<(Epoch, Round)>, ProtocolError> {
        let digest = final_message.context().config_digest;
        if digest != self.ctx.config_digest {
            debug!("Dropping final for foreign config {} from {}", digest, from);
            return Ok(None);
        }

        let key = (final_message.epoch, final_message.round);
        if self.highest.is_some_and(|h| key <= h) {
            debug!("Already handled final for e{}/r{}", key.0, key.1);
            return Ok(None);
        }

        self.validate(&final_message)?;
        self.highest = Some(key);

        info!(
            "Accepted final for round {} of epoch {} (via {})",
            key.1, key.0, from
        );

        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::FinalEcho {
                final_message: final_message.clone(),
            },
        });
        out.push(Action::Deliver(final_message));

        Ok(Some(key))
    }
}
