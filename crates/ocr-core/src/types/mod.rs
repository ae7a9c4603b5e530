pub mod context;
pub mod message;
pub mod observation;
pub mod report;

pub use context::{ConfigDigest, Epoch, OracleId, ReportingContext, Round};
pub use message::{Message, MessageFinal, MessageKind, MAX_MESSAGE_SIZE};
pub use observation::{Observation, ObservationValue, OracleValue};
pub use report::{ContractReport, ContractReportWithSignatures, ReportSignature};
