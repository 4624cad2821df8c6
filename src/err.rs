#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation timed out")]
    TimedOut,

    #[error("socket is not connected")]
    NotConnected,

    #[error("connection was reset by peer")]
    ConnectionReset,

    #[error("port: {0} has been unexpectedly closed")]
    PortClosed(u16),

    #[error("port: {0} already in use")]
    PortInUse(u16),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
