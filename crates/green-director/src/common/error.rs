use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Catalog error: {0}")]
    CatalogError(String),
    #[error("No community specified and no default community could be found")]
    MissingCommunity,
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl DirectorError {
    pub fn is_catalog_error(&self) -> bool {
        matches!(self, DirectorError::CatalogError(_))
    }
}

impl From<anyhow::Error> for DirectorError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:#}"))
    }
}

impl From<toml::de::Error> for DirectorError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}
