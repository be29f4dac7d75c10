use thiserror::Error;

/// Failures while bringing up or talking to external systems.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database unavailable: {0}")]
    Database(String),
    #[error("migrations failed: {0}")]
    Migration(String),
    #[error("email client: {0}")]
    EmailClient(String),
    #[error("tracing setup failed: {0}")]
    Telemetry(String),
    #[error("missing or invalid setting `{key}`")]
    Setting { key: &'static str },
}

impl InfraError {
    pub fn database(err: impl ToString) -> Self {
        Self::Database(err.to_string())
    }

    pub fn migration(err: impl ToString) -> Self {
        Self::Migration(err.to_string())
    }

    pub fn email_client(err: impl ToString) -> Self {
        Self::EmailClient(err.to_string())
    }

    pub fn telemetry(err: impl ToString) -> Self {
        Self::Telemetry(err.to_string())
    }
}
