use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ocr_core::{ContractReportWithSignatures, OracleId, OracleValue, ReportSignature, ReportingContext, Sig};
use tracing::debug;

use crate::canonical::Canonicalizer;
use crate::config::ConfigContext;
use crate::error::ProtocolError;

/// Collects report signatures over one canonical body until quorum
pub struct ReportQuorum {
    ctx: Arc<ConfigContext>,
    context: ReportingContext,
    report_bytes: Vec<u8>,
    signatures: BTreeMap<OracleId, Sig>,
}

impl ReportQuorum {
    pub fn new(ctx: Arc<ConfigContext>, context: ReportingContext, report_bytes: Vec<u8>) -> Self {
        ReportQuorum {
            ctx,
            context,
            report_bytes,
            signatures: BTreeMap::new(),
        }
    }

    pub fn report_bytes(&self) -> &[u8] {
        &self.report_bytes
    }

    /// Add a signature; returns whether quorum is reached.
    ///
    /// The first signature recorded for an oracle is kept; later ones from
    /// the same oracle are ignored.
    pub fn add_signature(&mut self, signer: OracleId, signature: Sig) -> Result<bool, ProtocolError> {
        if !self.ctx.committee.contains(signer) {
            return Err(ProtocolError::UnknownOracle(signer));
        }

        if self.signatures.contains_key(&signer) {
            debug!("Duplicate report signature from {}", signer);
            return Ok(self.has_quorum());
        }

        self.ctx
            .committee
            .verify_report(signer, &self.context, &self.report_bytes, &signature)?;

        self.signatures.insert(signer, signature);

        debug!(
            "Added report signature from {}, total: {}/{}",
            signer,
            self.signatures.len(),
            self.ctx.quorum()
        );

        Ok(self.has_quorum())
    }

    pub fn has_quorum(&self) -> bool {
        self.signatures.len() >= self.ctx.quorum()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// The collected signatures, ordered by signer (only if we have quorum)
    pub fn build(&self) -> Result<Vec<ReportSignature>, ProtocolError> {
        if !self.has_quorum() {
            return Err(ProtocolError::InsufficientSignatures {
                have: self.signatures.len(),
                need: self.ctx.quorum(),
            });
        }

        Ok(self
            .signatures
            .iter()
            .map(|(signer, signature)| ReportSignature {
                signer: *signer,
                signature: *signature,
            })
            .collect())
    }
}

/// Check that report values are ordered by strictly increasing oracle id,
/// belong to the committee, and cover at least a quorum of oracles
pub fn check_report_values(values: &[OracleValue], ctx: &ConfigContext) -> Result<(), ProtocolError> {
    if values.len() < ctx.quorum() {
        return Err(ProtocolError::InvalidObservations(format!(
            "{} values, need at least {}",
            values.len(),
            ctx.quorum()
        )));
    }

    let mut previous: Option<OracleId> = None;
    for value in values {
        if !ctx.committee.contains(value.oracle_id) {
            return Err(ProtocolError::UnknownOracle(value.oracle_id));
        }
        if previous.is_some_and(|p| p >= value.oracle_id) {
            return Err(ProtocolError::InvalidObservations(format!(
                "{} out of order or repeated",
                value.oracle_id
            )));
        }
        previous = Some(value.oracle_id);
    }

    Ok(())
}

/// Verify that a report carries a quorum of distinct, valid signatures over
/// its canonical body, within the given configuration. Returns the canonical
/// bytes the quorum signed.
pub fn verify_report_quorum(
    report: &ContractReportWithSignatures,
    ctx: &ConfigContext,
    canonicalizer: &dyn Canonicalizer,
) -> Result<Vec<u8>, ProtocolError> {
    let context = report.context();
    if context.config_digest != ctx.config_digest {
        return Err(ProtocolError::ForeignConfig(context.config_digest));
    }

    // Check we have enough signatures
    if report.signatures.len() < ctx.quorum() {
        return Err(ProtocolError::InsufficientSignatures {
            have: report.signatures.len(),
            need: ctx.quorum(),
        });
    }

    let values = &report.contract_report.values;
    check_report_values(values, ctx)?;
    let report_bytes = canonicalizer.canonicalize(values)?;

    let mut seen = BTreeSet::new();
    for rs in &report.signatures {
        if !seen.insert(rs.signer) {
            return Err(ProtocolError::DuplicateSigner(rs.signer));
        }
        ctx.committee
            .verify_report(rs.signer, context, &report_bytes, &rs.signature)?;
    }

    Ok(report_bytes)
}
