use thiserror::Error;

#[derive(Error, Debug)]
pub enum TenderError {
    #[error("invalid ticket: {0}")]
    InvalidTicket(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("price history error: {0}")]
    History(String),
    #[error("vector backend error: {0}")]
    VectorBackend(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TenderError>;

impl From<anyhow::Error> for TenderError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_convert_to_serde_variant() {
        let err: TenderError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, TenderError::Serde(_)));
        assert!(err.to_string().starts_with("serde json error"));
    }
}
