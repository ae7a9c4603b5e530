//! OCR Protocol - Leader-driven reporting rounds
//!
//! This crate implements the per-oracle protocol state machine: epoch and
//! leader management, the leader's observe/report/final pipeline, the
//! follower roles that observe and co-sign, final-report propagation, and an
//! async runner that owns the state machine on a single task.

pub mod canonical;
pub mod config;
pub mod error;
pub mod events;
pub mod follower;
pub mod leader;
pub mod net;
pub mod oracle;
pub mod pacemaker;
pub mod propagator;
pub mod quorum;
pub mod round;
pub mod runner;
pub mod source;

pub use canonical::{CanonicalizeError, Canonicalizer, MedianCanonicalizer, MedianReport};
pub use config::{ConfigContext, ProtocolConfig};
pub use error::ProtocolError;
pub use events::{AssertionViolation, NullTelemetry, ReportSink, TelemetrySink};
pub use follower::Follower;
pub use leader::leader_for_epoch;
pub use net::{Destination, InboundMessage, Transport};
pub use oracle::{Action, Event, Oracle, TimerId};
pub use pacemaker::EpochCoordinator;
pub use propagator::FinalPropagator;
pub use quorum::{verify_report_quorum, ReportQuorum};
pub use round::RoundDriver;
pub use runner::{OracleRunner, ShutdownHandle};
pub use source::{DataSource, DataSourceError};
