//! Epoch and leader management.
//!
//! Each oracle runs a leader-silence timer that is reset whenever a final
//! report for the current epoch is accepted. When it expires the oracle
//! announces that it wants to move on with a new-epoch message. Once f+1
//! oracles want some epoch, everyone else joins the request (at least one of
//! them is honest); once 2f+1 do, the epoch is adopted.

use std::sync::Arc;
use std::time::Duration;

use ocr_core::{Epoch, Message, OracleId};
use tracing::{debug, info};

use crate::config::ConfigContext;
use crate::net::Destination;
use crate::oracle::{Action, TimerId};

pub struct EpochCoordinator {
    ctx: Arc<ConfigContext>,
    delta_progress: Duration,
    delta_resend: Duration,
    /// Current epoch
    epoch: Epoch,
    /// Highest epoch this node has announced
    ne: Epoch,
    /// Highest epoch announced by each oracle (0 = none)
    announced: Vec<Epoch>,
    progress_generation: u64,
    resending: bool,
}

impl EpochCoordinator {
    pub fn new(ctx: Arc<ConfigContext>, delta_progress: Duration, delta_resend: Duration) -> Self {
        let n = ctx.n;
        EpochCoordinator {
            ctx,
            delta_progress,
            delta_resend,
            epoch: 1,
            ne: 1,
            announced: vec![0; n],
            progress_generation: 0,
            resending: false,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Highest epoch this node has asked to move to
    pub fn announced_epoch(&self) -> Epoch {
        self.ne
    }

    pub fn leader(&self) -> OracleId {
        self.ctx.leader(self.epoch)
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == self.ctx.oracle_id
    }

    /// Arm the first leader-silence timer
    pub fn start(&mut self, out: &mut Vec<Action>) {
        info!(
            "Starting in epoch {} with leader {}",
            self.epoch,
            self.leader()
        );
        self.arm_progress_timer(out);
    }

    /// Note that the current leader made progress
    pub fn record_progress(&mut self, out: &mut Vec<Action>) {
        self.arm_progress_timer(out);
    }

    fn arm_progress_timer(&mut self, out: &mut Vec<Action>) {
        self.progress_generation += 1;
        out.push(Action::SetTimer {
            timer: TimerId::Progress {
                epoch: self.epoch,
                generation: self.progress_generation,
            },
            after: self.delta_progress,
        });
    }

    /// Leader-silence timer expired; returns whether it was still current
    pub fn on_progress_timeout(&mut self, epoch: Epoch, generation: u64, out: &mut Vec<Action>) -> bool {
        if epoch != self.epoch || generation != self.progress_generation {
            return false;
        }

        let target = self.epoch.max(self.ne) + 1;
        info!(
            "No progress in epoch {} (leader {}), requesting epoch {}",
            self.epoch,
            self.leader(),
            target
        );
        self.announce(target, out);
        true
    }

    pub fn on_resend_timeout(&mut self, epoch: Epoch, out: &mut Vec<Action>) {
        if epoch != self.epoch || self.ne <= self.epoch {
            self.resending = false;
            return;
        }

        debug!("Re-sending new-epoch {}", self.ne);
        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::NewEpoch { epoch: self.ne },
        });
        out.push(Action::SetTimer {
            timer: TimerId::Resend { epoch: self.epoch },
            after: self.delta_resend,
        });
    }

    fn announce(&mut self, target: Epoch, out: &mut Vec<Action>) {
        self.ne = target;
        let own = self.ctx.oracle_id.index();
        self.announced[own] = self.announced[own].max(target);

        out.push(Action::Send {
            to: Destination::Broadcast,
            message: Message::NewEpoch { epoch: target },
        });

        if !self.resending {
            self.resending = true;
            out.push(Action::SetTimer {
                timer: TimerId::Resend { epoch: self.epoch },
                after: self.delta_resend,
            });
        }
    }

    /// Highest epoch announced by at least `threshold` oracles
    fn supported_epoch(&self, threshold: usize) -> Option<Epoch> {
        let mut votes: Vec<Epoch> = self.announced.iter().copied().filter(|e| *e > 0).collect();
        if threshold == 0 || votes.len() < threshold {
            return None;
        }
        votes.sort_unstable_by(|a, b| b.cmp(a));
        Some(votes[threshold - 1])
    }

    /// Handle a new-epoch announcement; returns the adopted epoch if the
    /// announcement completed a request
    pub fn on_new_epoch(&mut self, from: OracleId, epoch: Epoch, out: &mut Vec<Action>) -> Option<Epoch> {
        if epoch <= self.epoch {
            debug!("Ignoring stale new-epoch {} from {}", epoch, from);
            return None;
        }

        let slot = self.announced.get_mut(from.index())?;
        if epoch <= *slot {
            return None;
        }
        *slot = epoch;

        if let Some(join) = self.supported_epoch(self.ctx.new_epoch_join_threshold()) {
            if join > self.ne {
                debug!("Joining request for epoch {}", join);
                self.announce(join, out);
            }
        }

        match self.supported_epoch(self.ctx.new_epoch_adopt_threshold()) {
            Some(adopt) if adopt > self.epoch => {
                self.advance_to(adopt, out);
                Some(adopt)
            }
            _ => None,
        }
    }

    /// Move to a strictly higher epoch; returns false otherwise
    pub fn advance_to(&mut self, epoch: Epoch, out: &mut Vec<Action>) -> bool {
        if epoch <= self.epoch {
            return false;
        }

        self.epoch = epoch;
        self.ne = self.ne.max(epoch);
        self.resending = false;
        self.arm_progress_timer(out);

        info!("Entered epoch {} with leader {}", epoch, self.leader());
        true
    }
}
