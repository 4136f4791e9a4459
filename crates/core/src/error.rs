use thiserror::Error;

use crate::types::UnitId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("executor refused to create unit '{0}'")]
    UnitCreation(String),

    #[error("unknown executor unit {0}")]
    UnknownUnit(UnitId),
}
