pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("channel {index} out of range (channel count {channel_count})")]
    ChannelOutOfRange { index: usize, channel_count: usize },

    #[error("power source error on channel {channel}: {message}")]
    Source { channel: usize, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("control channel disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn read_failed<S: Into<String>>(channel: usize, msg: S) -> Self {
        Error::Source {
            channel,
            message: msg.into(),
        }
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Error::Serialization(msg.into())
    }

    pub(crate) fn out_of_range(index: usize, channel_count: usize) -> Self {
        Error::ChannelOutOfRange {
            index,
            channel_count,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
