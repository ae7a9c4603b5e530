use std::time::Duration;

use ocr_core::{Committee, ConfigDigest, Epoch, OracleId, ReportingContext, Round};

use crate::error::ProtocolError;
use crate::leader::leader_for_epoch;

/// Timing and limits of the protocol
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Leader-silence timeout: without an accepted final for this long a
    /// node asks to move to the next epoch
    pub delta_progress: Duration,
    /// Interval at which a pending new-epoch announcement is re-sent
    pub delta_resend: Duration,
    /// Interval between the starts of two rounds of the same leader
    pub delta_round: Duration,
    /// Extra time the leader waits for observations after reaching quorum
    pub delta_grace: Duration,
    /// Bound on the observation collection phase
    pub observation_timeout: Duration,
    /// Bound on the report signature collection phase
    pub report_timeout: Duration,
    /// Bound on a single data source fetch
    pub data_source_timeout: Duration,
    /// Maximum number of rounds a leader runs per epoch
    pub r_max: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            delta_progress: Duration::from_secs(15),
            delta_resend: Duration::from_secs(2),
            delta_round: Duration::from_secs(5),
            delta_grace: Duration::from_millis(500),
            observation_timeout: Duration::from_secs(2),
            report_timeout: Duration::from_secs(2),
            data_source_timeout: Duration::from_secs(1),
            r_max: 50,
        }
    }
}

impl ProtocolConfig {
    /// Reject timing combinations under which rounds could never complete
    pub fn sanity_check(&self) -> Result<(), ProtocolError> {
        let durations = [
            ("delta_progress", self.delta_progress),
            ("delta_resend", self.delta_resend),
            ("delta_round", self.delta_round),
            ("observation_timeout", self.observation_timeout),
            ("report_timeout", self.report_timeout),
            ("data_source_timeout", self.data_source_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ProtocolError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }

        if self.delta_grace >= self.observation_timeout {
            return Err(ProtocolError::InvalidConfig(
                "delta_grace must be shorter than observation_timeout".into(),
            ));
        }
        if self.data_source_timeout > self.observation_timeout {
            return Err(ProtocolError::InvalidConfig(
                "data_source_timeout must not exceed observation_timeout".into(),
            ));
        }
        if self.observation_timeout + self.report_timeout > self.delta_round {
            return Err(ProtocolError::InvalidConfig(
                "observation_timeout + report_timeout must fit into delta_round".into(),
            ));
        }
        if self.delta_round >= self.delta_progress {
            return Err(ProtocolError::InvalidConfig(
                "delta_round must be shorter than delta_progress".into(),
            ));
        }
        if self.r_max == 0 {
            return Err(ProtocolError::InvalidConfig("r_max must be at least 1".into()));
        }

        Ok(())
    }
}

/// Static identity of one protocol session
#[derive(Debug, Clone)]
pub struct ConfigContext {
    pub config_digest: ConfigDigest,
    pub oracle_id: OracleId,
    pub n: usize,
    pub f: usize,
    pub committee: Committee,
}

impl ConfigContext {
    /// Build a context whose digest is derived from the committee
    pub fn new(
        committee: Committee,
        f: usize,
        oracle_id: OracleId,
        label: &str,
    ) -> Result<Self, ProtocolError> {
        let f_byte = u8::try_from(f)
            .map_err(|_| ProtocolError::InvalidConfig(format!("f={f} is too large")))?;
        let digest = ConfigDigest::compute(committee.keys(), f_byte, label)?;
        Self::with_digest(committee, f, oracle_id, digest)
    }

    pub fn with_digest(
        committee: Committee,
        f: usize,
        oracle_id: OracleId,
        config_digest: ConfigDigest,
    ) -> Result<Self, ProtocolError> {
        let n = committee.len();
        if n > u8::MAX as usize {
            return Err(ProtocolError::InvalidConfig(format!(
                "committee of {n} oracles exceeds {}",
                u8::MAX
            )));
        }
        if n < 3 * f + 1 {
            return Err(ProtocolError::InvalidConfig(format!(
                "n={n} must be at least 3f+1 for f={f}"
            )));
        }
        if !committee.contains(oracle_id) {
            return Err(ProtocolError::UnknownOracle(oracle_id));
        }

        Ok(ConfigContext {
            config_digest,
            oracle_id,
            n,
            f,
            committee,
        })
    }

    /// Distinct signatures or observations needed for a report
    pub fn quorum(&self) -> usize {
        self.n - self.f
    }

    /// Announcements after which a node joins a higher epoch request
    pub fn new_epoch_join_threshold(&self) -> usize {
        self.f + 1
    }

    /// Announcements after which a node moves to a higher epoch
    pub fn new_epoch_adopt_threshold(&self) -> usize {
        2 * self.f + 1
    }

    pub fn leader(&self, epoch: Epoch) -> OracleId {
        leader_for_epoch(&self.config_digest, epoch, self.n)
    }

    pub fn reporting_context(&self, epoch: Epoch, round: Round) -> ReportingContext {
        ReportingContext::new(self.config_digest, epoch, round)
    }
}
