//! Typed protocol messages and their payload codecs.
//!
//! [`Body`] is the closed registry: one variant per supported
//! `(cmd_type, trans_type, oid)` triple, dispatch by match. Decoding a
//! triple outside the registry fails with
//! [`BlackbirdError::UnknownMessage`] without disturbing the stream.

use prost::Message as _;

use super::{CmdType, Oid, TransType, frame, pack_header, split_body, unpack_header};
use crate::BlackbirdError;

// Wire schemas. Field numbers follow the device firmware; strings are
// plain proto3 strings, FileInfo.size is zig-zag encoded.

#[derive(Clone, PartialEq, prost::Message)]
struct DeviceInfoParams {
    #[prost(int32, tag = "1")]
    dev_type: i32,
    #[prost(int32, optional, tag = "2")]
    file_trans_size: Option<i32>,
    #[prost(string, tag = "3")]
    hardware_version: String,
    #[prost(string, tag = "4")]
    software_version: String,
    #[prost(string, tag = "5")]
    serial_number: String,
    #[prost(string, tag = "6")]
    protocol_version: String,
    #[prost(int32, tag = "7")]
    ble_mtu: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct GetFileParams {
    #[prost(string, tag = "1")]
    filename: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct GetFileResponseParams {
    #[prost(bool, tag = "1")]
    exist: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
struct FileInfoParams {
    #[prost(string, tag = "1")]
    filename: String,
    #[prost(sint32, tag = "2")]
    size: i32,
}

/// Hardware family reported by [`DeviceInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevType {
    Handwatch,
    Hub,
    BikeComputer,
}

impl TryFrom<i32> for DevType {
    type Error = BlackbirdError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handwatch),
            1 => Ok(Self::Hub),
            2 => Ok(Self::BikeComputer),
            other => Err(BlackbirdError::EnumOutOfRange(other)),
        }
    }
}

/// Negotiated file chunk size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTransSize {
    Size128,
    Size256,
    Size512,
    Size1024,
}

impl FileTransSize {
    /// Chunk size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Size128 => 128,
            Self::Size256 => 256,
            Self::Size512 => 512,
            Self::Size1024 => 1024,
        }
    }

    fn raw(self) -> i32 {
        match self {
            Self::Size128 => 0,
            Self::Size256 => 1,
            Self::Size512 => 2,
            Self::Size1024 => 3,
        }
    }
}

impl TryFrom<i32> for FileTransSize {
    type Error = BlackbirdError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Size128),
            1 => Ok(Self::Size256),
            2 => Ok(Self::Size512),
            3 => Ok(Self::Size1024),
            other => Err(BlackbirdError::EnumOutOfRange(other)),
        }
    }
}

/// Device identity and transfer parameters from the handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub dev_type: DevType,
    pub file_trans_size: FileTransSize,
    pub hardware_version: String,
    pub software_version: String,
    pub serial_number: String,
    pub protocol_version: String,
    pub ble_mtu: i32,
}

impl TryFrom<DeviceInfoParams> for DeviceInfo {
    type Error = BlackbirdError;

    fn try_from(params: DeviceInfoParams) -> Result<Self, Self::Error> {
        // some firmware builds omit the field; the stock app reads 512
        let file_trans_size = match params.file_trans_size {
            Some(raw) => FileTransSize::try_from(raw)?,
            None => FileTransSize::Size512,
        };
        Ok(Self {
            dev_type: DevType::try_from(params.dev_type)?,
            file_trans_size,
            hardware_version: params.hardware_version,
            software_version: params.software_version,
            serial_number: params.serial_number,
            protocol_version: params.protocol_version,
            ble_mtu: params.ble_mtu,
        })
    }
}

/// Announced size and name of an incoming file transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub filename: String,
    pub size: i32,
}

/// Position of a [`FileChunk`] within its transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkFlag {
    First,
    Middle,
    Last,
    Single,
}

impl ChunkFlag {
    /// Whether this chunk closes the transfer.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Last | Self::Single)
    }

    fn raw(self) -> u8 {
        match self {
            Self::First => 0,
            Self::Middle => 1,
            Self::Last => 2,
            Self::Single => 3,
        }
    }
}

impl TryFrom<u8> for ChunkFlag {
    type Error = BlackbirdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::First),
            1 => Ok(Self::Middle),
            2 => Ok(Self::Last),
            3 => Ok(Self::Single),
            other => Err(BlackbirdError::EnumOutOfRange(i32::from(other))),
        }
    }
}

/// One slice of a streamed file. The embedded `seq` restarts from zero
/// for every file and is advisory; stream ordering is enforced by the
/// frame sid.
#[derive(Clone, Debug, PartialEq)]
pub struct FileChunk {
    pub seq: u8,
    pub flag: ChunkFlag,
    pub data: Vec<u8>,
}

/// Closed registry of every message this crate emits or accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// `Get/Default/GetDeviceInfo`, empty payload.
    GetDeviceInfo,
    /// `Get/Response/GetDeviceInfo`.
    DeviceInfo(DeviceInfo),
    /// `Get/Default/GetFileStatus`, empty payload.
    GetFileStatus,
    /// `Get/Response/GetFileStatus`; payload reserved, ignored.
    FileStatus,
    /// `Get/Default/GetFile`.
    GetFile { filename: String },
    /// `Get/Response/GetFile`.
    GetFileResponse { exist: bool },
    /// `Push/Default/PostFileInfo`, device-initiated.
    FileInfo(FileInfo),
    /// `Push/Default/ReceiveFile`, raw `[seq][flag]data` payload.
    FileChunk(FileChunk),
    /// Acknowledgement; mirrors the acked frame's `cmd_type`, carries
    /// no OID and no payload.
    Ack(CmdType),
}

impl Body {
    pub fn cmd_type(&self) -> CmdType {
        match self {
            Self::GetDeviceInfo
            | Self::DeviceInfo(_)
            | Self::GetFileStatus
            | Self::FileStatus
            | Self::GetFile { .. }
            | Self::GetFileResponse { .. } => CmdType::Get,
            Self::FileInfo(_) | Self::FileChunk(_) => CmdType::Push,
            Self::Ack(cmd) => *cmd,
        }
    }

    pub fn trans_type(&self) -> TransType {
        match self {
            Self::GetDeviceInfo
            | Self::GetFileStatus
            | Self::GetFile { .. }
            | Self::FileInfo(_)
            | Self::FileChunk(_) => TransType::Default,
            Self::DeviceInfo(_) | Self::FileStatus | Self::GetFileResponse { .. } => {
                TransType::Response
            }
            Self::Ack(_) => TransType::Ack,
        }
    }

    pub fn oid(&self) -> Oid {
        match self {
            Self::GetDeviceInfo | Self::DeviceInfo(_) => Oid::GetDeviceInfo,
            Self::GetFileStatus | Self::FileStatus => Oid::GetFileStatus,
            Self::GetFile { .. } | Self::GetFileResponse { .. } => Oid::GetFile,
            Self::FileInfo(_) => Oid::PostFileInfo,
            Self::FileChunk(_) => Oid::ReceiveFile,
            Self::Ack(_) => Oid::Invalid,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::GetDeviceInfo | Self::GetFileStatus | Self::FileStatus | Self::Ack(_) => {
                Vec::new()
            }
            Self::DeviceInfo(info) => DeviceInfoParams {
                dev_type: info.dev_type as i32,
                file_trans_size: Some(info.file_trans_size.raw()),
                hardware_version: info.hardware_version.clone(),
                software_version: info.software_version.clone(),
                serial_number: info.serial_number.clone(),
                protocol_version: info.protocol_version.clone(),
                ble_mtu: info.ble_mtu,
            }
            .encode_to_vec(),
            Self::GetFile { filename } => GetFileParams {
                filename: filename.clone(),
            }
            .encode_to_vec(),
            Self::GetFileResponse { exist } => GetFileResponseParams { exist: *exist }
                .encode_to_vec(),
            Self::FileInfo(info) => FileInfoParams {
                filename: info.filename.clone(),
                size: info.size,
            }
            .encode_to_vec(),
            Self::FileChunk(chunk) => {
                let mut payload = Vec::with_capacity(2 + chunk.data.len());
                payload.push(chunk.seq);
                payload.push(chunk.flag.raw());
                payload.extend_from_slice(&chunk.data);
                payload
            }
        }
    }

    fn decode_payload(
        cmd: CmdType,
        trans: TransType,
        oid: Oid,
        payload: &[u8],
    ) -> Result<Self, BlackbirdError> {
        match (cmd, trans, oid) {
            (CmdType::Get, TransType::Default, Oid::GetDeviceInfo) => Ok(Self::GetDeviceInfo),
            (CmdType::Get, TransType::Response, Oid::GetDeviceInfo) => {
                let params = DeviceInfoParams::decode(payload)?;
                Ok(Self::DeviceInfo(DeviceInfo::try_from(params)?))
            }
            (CmdType::Get, TransType::Default, Oid::GetFileStatus) => Ok(Self::GetFileStatus),
            (CmdType::Get, TransType::Response, Oid::GetFileStatus) => Ok(Self::FileStatus),
            (CmdType::Get, TransType::Default, Oid::GetFile) => {
                let params = GetFileParams::decode(payload)?;
                Ok(Self::GetFile {
                    filename: params.filename,
                })
            }
            (CmdType::Get, TransType::Response, Oid::GetFile) => {
                let params = GetFileResponseParams::decode(payload)?;
                Ok(Self::GetFileResponse {
                    exist: params.exist,
                })
            }
            (CmdType::Push, TransType::Default, Oid::PostFileInfo) => {
                let params = FileInfoParams::decode(payload)?;
                Ok(Self::FileInfo(FileInfo {
                    filename: params.filename,
                    size: params.size,
                }))
            }
            (CmdType::Push, TransType::Default, Oid::ReceiveFile) => {
                let [seq, flag, data @ ..] = payload else {
                    return Err(BlackbirdError::TruncatedFrame);
                };
                Ok(Self::FileChunk(FileChunk {
                    seq: *seq,
                    flag: ChunkFlag::try_from(*flag)?,
                    data: data.to_vec(),
                }))
            }
            (cmd, trans, oid) => Err(BlackbirdError::UnknownMessage {
                cmd,
                trans,
                oid: oid as u16,
            }),
        }
    }
}

/// One protocol message: a 4-bit per-stream sequence id plus a typed
/// body fixing the `(cmd_type, trans_type, oid)` triple.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub sid: u8,
    pub body: Body,
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self { sid: 0, body }
    }

    /// The acknowledgement for this message, carrying the same sid.
    pub fn ack(&self) -> Message {
        Message {
            sid: self.sid,
            body: Body::Ack(self.body.cmd_type()),
        }
    }

    /// Serializes into a complete frame, stamping `sid` into the
    /// header byte.
    pub fn to_bytes(&self, sid: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        if self.body.trans_type() != TransType::Ack {
            payload.extend_from_slice(&(self.body.oid() as u16).to_be_bytes());
            payload.extend_from_slice(&self.body.encode_payload());
        }

        let mut body = Vec::with_capacity(payload.len() + 5);
        body.push(pack_header(
            self.body.cmd_type(),
            self.body.trans_type(),
            sid,
        ));
        body.extend_from_slice(&(payload.len() as u16 + 5).to_be_bytes());
        body.extend_from_slice(&payload);
        body.extend_from_slice(&frame::crc(&body).to_be_bytes());

        frame::frame(&body)
    }

    /// Parses a complete frame into a typed message.
    pub fn from_bytes(data: &[u8]) -> Result<Message, BlackbirdError> {
        let body = frame::deframe(data)?;
        if body.len() < 5 {
            return Err(BlackbirdError::TruncatedFrame);
        }

        let (checked, carried) = body.split_at(body.len() - 2);
        let got = u16::from_be_bytes([carried[0], carried[1]]);
        let expected = frame::crc(checked);
        if got != expected {
            return Err(BlackbirdError::CrcMismatch { expected, got });
        }

        let (header, oid, payload) = split_body(&body)?;
        let (cmd, trans, sid) = unpack_header(header)?;
        let body = match oid {
            None => Body::Ack(cmd),
            Some(raw) => {
                let oid = Oid::try_from(raw).map_err(|()| BlackbirdError::UnknownMessage {
                    cmd,
                    trans,
                    oid: raw,
                })?;
                Body::decode_payload(cmd, trans, oid, payload)?
            }
        };
        Ok(Message { sid, body })
    }
}
