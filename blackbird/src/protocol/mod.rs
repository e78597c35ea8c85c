//! The BB16 wire protocol.
//!
//! Three GATT characteristics carry independent packet streams; each
//! frame holds one [`message::Message`]. The modules below layer the
//! way the bytes do: [`frame`] delimits and checksums, this module
//! packs the header byte, [`message`] gives every frame a type, and
//! [`stream`] turns notifications into an ordered message queue.

pub mod frame;
pub mod message;
pub mod stream;

use uuid::{Uuid, uuid};

use crate::BlackbirdError;

/// Primary service exposing the three command characteristics.
pub const UUID_COMMON_SERVICE: Uuid = uuid!("0000fda0-0000-1000-8000-00805f9b34fb");
/// Request/response channel.
pub const UUID_COMMON_GET: Uuid = uuid!("0000fda1-0000-1000-8000-00805f9b34fb");
/// Host-to-device post channel.
pub const UUID_COMMON_POST: Uuid = uuid!("0000fda2-0000-1000-8000-00805f9b34fb");
/// Device-initiated push channel; file transfers stream here.
pub const UUID_COMMON_PUSH: Uuid = uuid!("0000fda3-0000-1000-8000-00805f9b34fb");

// OTA service. Reserved by the firmware, unused by this crate.
pub const UUID_OTA_SERVICE: Uuid = uuid!("0000fd00-0000-1000-8000-00805f9b34fb");
pub const UUID_OTA_NOTIFY: Uuid = uuid!("0000fd09-0000-1000-8000-00805f9b34fb");
pub const UUID_OTA_WRITE: Uuid = uuid!("0000fd0a-0000-1000-8000-00805f9b34fb");

/// Direction semantics of a frame, bits 7..6 of the header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmdType {
    Get = 0x00,
    Post = 0x01,
    Push = 0x02,
}

/// Frame role, bits 5..4 of the header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransType {
    Default = 0x00,
    Response = 0x01,
    Ack = 0x02,
}

/// 16-bit operation identifier selecting the message schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Oid {
    Invalid = 0x00,
    GetDeviceInfo = 0x01,
    PostUtcInfo = 0x02,
    PostReset = 0x03,
    GetFunction = 0x04,
    GetSupport = 0x05,
    GetHistory = 0x15,
    GetFile = 0x29,
    PostDeleteFile = 0x2A,
    PostFileInfo = 0x2B,
    ReceiveFile = 0x2C,
    PostStopFile = 0x2D,
    GetFileStatus = 0x32,
    GetStorage = 0x33,
    GetCustomer = 0x34,
    ScanDevice = 0x3D,
    SaveDevice = 0x3E,
    OffDevice = 0x3F,
    CheckPower = 0x40,
    ResultPower = 0x41,
    RunInfo = 0x2710,
    RunStart = 0x2711,
    TestCmd = 0xFF,
}

impl TryFrom<u8> for CmdType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Get),
            0x01 => Ok(Self::Post),
            0x02 => Ok(Self::Push),
            _ => Err(()),
        }
    }
}

impl TryFrom<u8> for TransType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Default),
            0x01 => Ok(Self::Response),
            0x02 => Ok(Self::Ack),
            _ => Err(()),
        }
    }
}

impl TryFrom<u16> for Oid {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Invalid),
            0x01 => Ok(Self::GetDeviceInfo),
            0x02 => Ok(Self::PostUtcInfo),
            0x03 => Ok(Self::PostReset),
            0x04 => Ok(Self::GetFunction),
            0x05 => Ok(Self::GetSupport),
            0x15 => Ok(Self::GetHistory),
            0x29 => Ok(Self::GetFile),
            0x2A => Ok(Self::PostDeleteFile),
            0x2B => Ok(Self::PostFileInfo),
            0x2C => Ok(Self::ReceiveFile),
            0x2D => Ok(Self::PostStopFile),
            0x32 => Ok(Self::GetFileStatus),
            0x33 => Ok(Self::GetStorage),
            0x34 => Ok(Self::GetCustomer),
            0x3D => Ok(Self::ScanDevice),
            0x3E => Ok(Self::SaveDevice),
            0x3F => Ok(Self::OffDevice),
            0x40 => Ok(Self::CheckPower),
            0x41 => Ok(Self::ResultPower),
            0x2710 => Ok(Self::RunInfo),
            0x2711 => Ok(Self::RunStart),
            0xFF => Ok(Self::TestCmd),
            _ => Err(()),
        }
    }
}

/// Packs the header byte: `cmd[2] : trans[2] : sid[4]`, MSB first.
pub fn pack_header(cmd: CmdType, trans: TransType, sid: u8) -> u8 {
    ((cmd as u8) << 6) | ((trans as u8) << 4) | (sid & 0x0F)
}

/// Inverse of [`pack_header`]; rejects bit patterns outside the enums.
pub fn unpack_header(byte: u8) -> Result<(CmdType, TransType, u8), BlackbirdError> {
    let cmd = CmdType::try_from(byte >> 6).map_err(|()| BlackbirdError::UnknownHeader(byte))?;
    let trans =
        TransType::try_from((byte >> 4) & 0x03).map_err(|()| BlackbirdError::UnknownHeader(byte))?;
    Ok((cmd, trans, byte & 0x0F))
}

/// Splits an unescaped body into `(header_byte, oid, payload)`.
///
/// Validates the length field against the body and the frame shape: an
/// ACK body is exactly `header + length + crc` (5 bytes) and carries
/// neither OID nor payload.
pub fn split_body(body: &[u8]) -> Result<(u8, Option<u16>, &[u8]), BlackbirdError> {
    if body.len() < 5 {
        return Err(BlackbirdError::TruncatedFrame);
    }
    let header = body[0];
    let declared = usize::from(u16::from_be_bytes([body[1], body[2]]));
    if declared != body.len() {
        return Err(BlackbirdError::LengthMismatch {
            expected: declared,
            got: body.len(),
        });
    }
    let (_, trans, _) = unpack_header(header)?;
    if trans == TransType::Ack {
        if body.len() != 5 {
            return Err(BlackbirdError::LengthMismatch {
                expected: 5,
                got: body.len(),
            });
        }
        return Ok((header, None, &[]));
    }
    if body.len() < 7 {
        return Err(BlackbirdError::TruncatedFrame);
    }
    let oid = u16::from_be_bytes([body[3], body[4]]);
    Ok((header, Some(oid), &body[5..body.len() - 2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        for cmd in [CmdType::Get, CmdType::Post, CmdType::Push] {
            for trans in [TransType::Default, TransType::Response, TransType::Ack] {
                for sid in 0..16 {
                    let byte = pack_header(cmd, trans, sid);
                    assert_eq!(unpack_header(byte).unwrap(), (cmd, trans, sid));
                }
            }
        }
    }

    #[test]
    fn bad_header_bits_rejected() {
        // cmd = 3 and trans = 3 are outside both enums
        assert!(matches!(
            unpack_header(0b1100_0000),
            Err(BlackbirdError::UnknownHeader(_))
        ));
        assert!(matches!(
            unpack_header(0b0011_0000),
            Err(BlackbirdError::UnknownHeader(_))
        ));
    }

    #[test]
    fn split_rejects_length_disagreement() {
        // GetDeviceInfo request body claiming one byte too many
        let body = [0x00, 0x00, 0x08, 0x00, 0x01, 0x12, 0x34];
        assert!(matches!(
            split_body(&body),
            Err(BlackbirdError::LengthMismatch {
                expected: 8,
                got: 7
            })
        ));
    }

    #[test]
    fn split_rejects_ack_with_payload() {
        // ACK header with a correct length field but trailing bytes
        let body = [0x20, 0x00, 0x07, 0x00, 0x01, 0x12, 0x34];
        assert!(matches!(
            split_body(&body),
            Err(BlackbirdError::LengthMismatch { expected: 5, .. })
        ));
    }
}
