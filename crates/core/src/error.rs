#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed telemetry output: {0}")]
    MalformedTelemetry(String),
}
