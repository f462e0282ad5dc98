use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("parse: {0}")]
    Parse(String),
    #[error("config: {0}")]
    Config(String),
    #[error("api: {0}")]
    Api(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[inline]
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
    #[inline]
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }
}
