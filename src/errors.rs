use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("timed out waiting for {expected} byte(s) from the device")]
    TransportTimeout { expected: usize },

    #[error("invalid sync bytes in response: expected [0x5B, 0x5A], got [{:#04X}, {:#04X}]", .got[0], .got[1])]
    BadSync { got: [u8; 2] },

    #[error("short response: expected {expected} byte(s), got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("firmware returned RC={0:#X}")]
    FirmwareFailure(u32),

    #[error("manifest error: {0}")]
    ManifestError(String),

    #[error("image file {file} not found for target {target}")]
    MissingImage { file: String, target: String },

    #[error("{file} overflows partition {partition}")]
    PartitionOverflow { file: String, partition: String },

    #[error("no matching USB CDC port found")]
    DiscoveryFailure,

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),
}
