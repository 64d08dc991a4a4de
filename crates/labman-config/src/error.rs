#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("lookup error expanding variable: {0}")]
    ShellExpandLookupVar(#[from] shellexpand::LookupError<std::env::VarError>),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
