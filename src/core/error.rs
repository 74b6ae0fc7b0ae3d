use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("message length {len} exceeds max message size {max}")]
    MessageTooLarge { len: usize, max: usize },
    #[error("failed to initialize shared memory `{name}`: {source}")]
    ResourceInit {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("queue is not initialized")]
    NotInitialized,
    #[error("corrupt queue data: {0}")]
    Corrupt(&'static str),
}

impl Error {
    pub(crate) fn resource_init(name: &str, source: io::Error) -> Self {
        Error::ResourceInit {
            name: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
