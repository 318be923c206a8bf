use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed campaign: {0}")]
    MalformedCampaign(String),

    #[error("Unknown campaign: {0}")]
    UnknownCampaign(i64),

    #[error("Malformed trigger: {0}")]
    MalformedTrigger(String),

    #[error("Asset storage error: {0}")]
    Storage(String),

    #[error("Asset transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for CampaignError {
    fn from(err: config::ConfigError) -> Self {
        CampaignError::Config(err.to_string())
    }
}
