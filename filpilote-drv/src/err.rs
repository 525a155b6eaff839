use filpilote_lib::HeatingError;

pub type DrvResult = anyhow::Result<()>;

#[derive(thiserror::Error, Debug)]
pub enum DrvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Heating error: {0}")]
    Heating(#[from] HeatingError),

    #[error("Config error: {0}")]
    Config(String),
}
