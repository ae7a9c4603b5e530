use std::future::Future;

use ocr_core::ObservationValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed reading: {0}")]
    Malformed(String),
}

/// Supplies the local oracle's current reading
pub trait DataSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<ObservationValue, DataSourceError>> + Send;
}
