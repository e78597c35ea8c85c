#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations)]

pub mod ble;
pub mod cloud;
pub mod config;
pub mod device;
pub mod fit;
pub mod protocol;
pub mod record;
pub mod session;

pub use ble::{BleConnection, GattLink};
pub use cloud::CloudClient;
pub use config::Settings;
pub use device::Bb16Client;
pub use session::{SessionData, UploadHistory};

use thiserror::Error;

use crate::protocol::{CmdType, TransType};

/// Comprehensive error type for every failure the sync suite can surface
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BlackbirdError {
    #[error("ble transport failure")]
    Ble(#[from] btleplug::Error),
    #[error("no bluetooth adapter present")]
    NoAdapter,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("characteristic {0} not found on device")]
    MissingCharacteristic(uuid::Uuid),
    #[error("notification channel closed")]
    TransportClosed,

    #[error("frame delimiters missing or corrupt")]
    BadDelimiter,
    #[error("invalid escape argument {0:#04x}")]
    BadEscape(u8),
    #[error("frame truncated")]
    TruncatedFrame,
    #[error("crc mismatch: computed {expected:#06x}, frame carries {got:#06x}")]
    CrcMismatch { expected: u16, got: u16 },
    #[error("length field promises {expected} bytes, body has {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("unknown header byte {0:#04x}")]
    UnknownHeader(u8),
    #[error("unknown message ({cmd:?}, {trans:?}, oid {oid:#06x})")]
    UnknownMessage {
        cmd: CmdType,
        trans: TransType,
        oid: u16,
    },
    #[error("protobuf payload decode failed")]
    PayloadDecode(#[from] prost::DecodeError),
    #[error("enum value {0} out of range")]
    EnumOutOfRange(i32),
    #[error("sequence skew: expected sid {expected}, got {got}")]
    SequenceSkew { expected: u8, got: u8 },
    #[error("unexpected response from device")]
    UnexpectedResponse,
    #[error("device opened transfer for {got:?}, requested {requested:?}")]
    FileNameSkew { requested: String, got: String },
    #[error("transfer overran declared size: {received} > {declared}")]
    Overrun { declared: u64, received: u64 },
    #[error("transfer ended at {received} bytes, device declared {declared}")]
    SizeMismatch { declared: u64, received: u64 },
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("device does not expose filelist.txt")]
    MissingListing,
    #[error("malformed listing line {0:?}")]
    InvalidListing(String),

    #[error("io failure")]
    Io(#[from] std::io::Error),
    #[error("listing is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("fit decode failed: {0}")]
    FitParse(String),
    #[error("record timestamp {0} out of range")]
    InvalidTimestamp(i64),
    #[error("xml serialization failed")]
    Xml(#[from] quick_xml::DeError),
    #[error("record archive failed")]
    RecordArchive(#[from] async_zip::error::ZipError),
    #[error("json (de)serialization failed")]
    Json(#[from] serde_json::Error),
    #[error("bad settings file")]
    Config(#[from] toml::de::Error),
    #[error("http request failed")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} rejected the request: {msg}")]
    Api { endpoint: &'static str, msg: String },
    #[error("no cached session; run bb_login first")]
    NoSession,
}
