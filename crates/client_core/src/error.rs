use thiserror::Error;

/// Why an outbound message was rejected before reaching the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("no receiver given and no active contact")]
    MissingReceiver,
    #[error("group id is required")]
    MissingGroup,
    #[error("outbound queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("server_url must start with http:// or https://, got '{0}'")]
    UnsupportedScheme(String),
}
