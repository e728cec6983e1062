use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unknown capture filter preset '{0}'")]
    UnknownFilter(String),

    #[error("failed to list capture devices: {0}")]
    DeviceList(#[source] pcap::Error),

    #[error("capture device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to open capture on '{interface}': {source}")]
    Open {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("failed to apply filter '{expression}': {source}")]
    Filter {
        expression: String,
        #[source]
        source: pcap::Error,
    },

    #[error("unsupported link type {0}")]
    UnsupportedLink(String),

    #[error("capture read failed: {0}")]
    Read(#[source] pcap::Error),

    #[error("failed to enumerate local addresses: {0}")]
    Interfaces(String),
}
