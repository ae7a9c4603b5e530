use serde::{Deserialize, Serialize};

use crate::crypto::Sig;
use crate::types::context::{OracleId, ReportingContext};
use crate::types::observation::OracleValue;

/// A signed copy of one report body.
///
/// The body is `(context, values)`; `values` are ordered by oracle id and
/// carry at most one entry per oracle. `signature` is the holder's signature
/// over the canonical bytes derived from `values`, bound to `context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractReport {
    pub context: ReportingContext,
    pub values: Vec<OracleValue>,
    pub signature: Sig,
}

impl ContractReport {
    /// Whether this report carries the given body, ignoring its signature
    pub fn same_body_as(&self, context: &ReportingContext, values: &[OracleValue]) -> bool {
        self.context == *context && self.values == values
    }
}

/// A report signature attributed to the oracle that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSignature {
    pub signer: OracleId,
    pub signature: Sig,
}

/// A report ready for external submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractReportWithSignatures {
    pub contract_report: ContractReport,
    pub signatures: Vec<ReportSignature>,
}

impl ContractReportWithSignatures {
    pub fn context(&self) -> &ReportingContext {
        &self.contract_report.context
    }

    pub fn signers(&self) -> impl Iterator<Item = OracleId> + '_ {
        self.signatures.iter().map(|s| s.signer)
    }
}
