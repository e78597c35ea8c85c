//! High-level BB16 client: session setup, file downloads, record sync.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::BlackbirdError;
use crate::ble::GattLink;
use crate::protocol::message::{Body, DeviceInfo, Message};
use crate::protocol::stream::{PacketStream, READ_TIMEOUT};
use crate::protocol::{UUID_COMMON_GET, UUID_COMMON_POST, UUID_COMMON_PUSH};

/// Device files fetched on every sync when present. None of them is
/// required; a missing one is logged and skipped.
pub const AUX_FILES: [&str; 4] = [
    "Setting.json",
    "debug_info.txt",
    "SensorDevice.txt",
    "SensorSearch.txt",
];

const LISTING_NAME: &str = "filelist.txt";

/// A session with a connected BB16 device.
///
/// Owns the three packet streams for the lifetime of the connection.
/// Control requests go out on `GET` and are answered there; file
/// content arrives on `PUSH`. `POST` is held open because the firmware
/// expects all three subscriptions before it talks.
#[derive(Debug)]
pub struct Bb16Client<L: GattLink> {
    link: Arc<L>,
    get: PacketStream<L>,
    push: PacketStream<L>,
    post: PacketStream<L>,
    device_info: Option<DeviceInfo>,
    read_timeout: Duration,
}

impl<L: GattLink> Bb16Client<L> {
    /// Opens the three command streams over an established transport.
    pub async fn open(link: L) -> Result<Self, BlackbirdError> {
        let link = Arc::new(link);
        let mut get = PacketStream::open(Arc::clone(&link), UUID_COMMON_GET).await?;
        let mut push = match PacketStream::open(Arc::clone(&link), UUID_COMMON_PUSH).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = get.close().await;
                return Err(e);
            }
        };
        let post = match PacketStream::open(Arc::clone(&link), UUID_COMMON_POST).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = push.close().await;
                let _ = get.close().await;
                return Err(e);
            }
        };
        Ok(Self {
            link,
            get,
            push,
            post,
            device_info: None,
            read_timeout: READ_TIMEOUT,
        })
    }

    /// Device identity captured by [`Self::handshake`].
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Runs the fixed session handshake: device info, then the file
    /// status probe. The returned transfer parameters are kept for the
    /// session.
    pub async fn handshake(&mut self) -> Result<&DeviceInfo, BlackbirdError> {
        self.get.write(&Message::new(Body::GetDeviceInfo)).await?;
        let reply = self.get.read(self.read_timeout).await?;
        let Body::DeviceInfo(info) = reply.body else {
            return Err(BlackbirdError::UnexpectedResponse);
        };
        info!(
            "device: {:?} sn {} fw {} mtu {} chunk {}",
            info.dev_type,
            info.serial_number,
            info.software_version,
            info.ble_mtu,
            info.file_trans_size.bytes()
        );

        self.get.write(&Message::new(Body::GetFileStatus)).await?;
        let reply = self.get.read(self.read_timeout).await?;
        if !matches!(reply.body, Body::FileStatus) {
            return Err(BlackbirdError::UnexpectedResponse);
        }

        Ok(self.device_info.insert(info))
    }

    /// Downloads one file. `Ok(None)` means the device reports the
    /// file as absent, which is a normal outcome, not an error.
    pub async fn download_file(
        &mut self,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, BlackbirdError> {
        info!("downloading {filename}");
        self.get
            .write(&Message::new(Body::GetFile {
                filename: filename.to_string(),
            }))
            .await?;

        let reply = self.get.read(self.read_timeout).await?;
        let Body::GetFileResponse { exist } = reply.body else {
            return Err(BlackbirdError::UnexpectedResponse);
        };
        if !exist {
            debug!("{filename} is not present on the device");
            return Ok(None);
        }

        let reply = self.push.read(self.read_timeout).await?;
        let Body::FileInfo(file_info) = reply.body else {
            return Err(BlackbirdError::UnexpectedResponse);
        };
        if file_info.filename != filename {
            return Err(BlackbirdError::FileNameSkew {
                requested: filename.to_string(),
                got: file_info.filename,
            });
        }
        let declared = u64::try_from(file_info.size).unwrap_or(0);

        let mut data = Vec::new();
        let mut chunk_seq = 0u8;
        loop {
            let reply = self.push.read(self.read_timeout).await?;
            let Body::FileChunk(chunk) = reply.body else {
                return Err(BlackbirdError::UnexpectedResponse);
            };
            // file-scoped counter; advisory only, the stream sid is
            // the authoritative ordering
            if chunk.seq != chunk_seq {
                debug!(
                    "{filename}: chunk seq skew ({} on the wire, {chunk_seq} local)",
                    chunk.seq
                );
            }
            chunk_seq = chunk_seq.wrapping_add(1);

            data.extend_from_slice(&chunk.data);
            if data.len() as u64 > declared {
                return Err(BlackbirdError::Overrun {
                    declared,
                    received: data.len() as u64,
                });
            }
            trace!("{filename}: {} / {declared}", data.len());
            if chunk.flag.is_final() {
                break;
            }
        }

        if data.len() as u64 != declared {
            return Err(BlackbirdError::SizeMismatch {
                declared,
                received: data.len() as u64,
            });
        }
        Ok(Some(data))
    }

    /// Full record sync: handshake, fetch `filelist.txt`, download
    /// every listed record not already present in `save_dir`, then the
    /// auxiliary files on a best-effort basis.
    ///
    /// Returns the names of the newly downloaded records.
    pub async fn sync_records(&mut self, save_dir: &Path) -> Result<Vec<String>, BlackbirdError> {
        self.handshake().await?;

        let listing = self
            .download_file(LISTING_NAME)
            .await?
            .ok_or(BlackbirdError::MissingListing)?;
        write_atomic(&save_dir.join(LISTING_NAME), &listing).await?;
        let listing = String::from_utf8(listing)?;

        let mut new_records = Vec::new();
        for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (name, size) = parse_listing_line(line)?;

            let local = save_dir.join(name);
            if let Ok(metadata) = tokio::fs::metadata(&local).await {
                if metadata.len() == size {
                    info!("{name} ({size} bytes) already present, skipping");
                    continue;
                }
            }

            let Some(data) = self.download_file(name).await? else {
                warn!("{name} is listed but the device reports it absent");
                continue;
            };
            write_atomic(&local, &data).await?;
            new_records.push(name.to_string());
        }

        for name in AUX_FILES {
            match self.download_file(name).await {
                Ok(Some(data)) => {
                    if let Err(e) = write_atomic(&save_dir.join(name), &data).await {
                        warn!("failed to save {name}: {e}");
                    }
                }
                Ok(None) => warn!("{name} not present on the device"),
                Err(e) => warn!("failed to download {name}: {e}"),
            }
        }

        Ok(new_records)
    }

    /// Closes the streams in reverse open order and shuts the
    /// transport down.
    pub async fn close(mut self) -> Result<(), BlackbirdError> {
        let mut result = Ok(());
        for stream in [&mut self.post, &mut self.push, &mut self.get] {
            if let Err(e) = stream.close().await {
                result = Err(e);
            }
        }
        self.link.shutdown().await?;
        result
    }
}

/// Parses one `<name> <size>` listing line.
fn parse_listing_line(line: &str) -> Result<(&str, u64), BlackbirdError> {
    let (name, size) = line
        .split_once(' ')
        .ok_or_else(|| BlackbirdError::InvalidListing(line.to_string()))?;
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|_| BlackbirdError::InvalidListing(line.to_string()))?;
    Ok((name, size))
}

/// Writes through a sibling tempfile and renames it into place, so a
/// torn sync never leaves a partial record behind.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BlackbirdError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
