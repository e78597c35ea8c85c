//! BLE transport.
//!
//! [`GattLink`] is the narrow seam the protocol engine talks through,
//! so the engine runs unchanged against hardware ([`BleConnection`])
//! or an in-memory link in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::BlackbirdError;

/// Minimal GATT surface the protocol engine needs.
#[allow(async_fn_in_trait)]
pub trait GattLink: Send + Sync + 'static {
    /// Writes one packet to a characteristic.
    async fn write_char(&self, characteristic: Uuid, payload: &[u8])
    -> Result<(), BlackbirdError>;

    /// Enables notifications on a characteristic and returns the
    /// channel its packets arrive on.
    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BlackbirdError>;

    /// Disables notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), BlackbirdError>;

    /// Tears the transport down once every stream is closed.
    async fn shutdown(&self) -> Result<(), BlackbirdError> {
        Ok(())
    }

    /// Hardware quiet-time observed after enabling notifications.
    fn settle_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// How long [`BleConnection::connect`] scans before giving up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

const SCAN_POLL: Duration = Duration::from_millis(500);

/// A connected BB16 peripheral.
///
/// btleplug delivers every notification on one stream; a background
/// task fans them out to per-characteristic channels.
#[derive(Debug)]
pub struct BleConnection {
    peripheral: Peripheral,
    channels: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>>,
    dispatcher: JoinHandle<()>,
}

impl BleConnection {
    /// Connects to the peripheral with the given Bluetooth address.
    ///
    /// Scanning and pairing are out of scope; the address is expected
    /// to be known (the stock app shows it during setup).
    pub async fn connect(address: &str) -> Result<Self, BlackbirdError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BlackbirdError::NoAdapter)?;

        adapter.start_scan(ScanFilter::default()).await?;
        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        let peripheral = 'scan: loop {
            for peripheral in adapter.peripherals().await? {
                if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                    break 'scan peripheral;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = adapter.stop_scan().await;
                return Err(BlackbirdError::DeviceNotFound(address.to_string()));
            }
            tokio::time::sleep(SCAN_POLL).await;
        };
        let _ = adapter.stop_scan().await;

        debug!("connecting to {address}");
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let channels: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut notifications = peripheral.notifications().await?;
        let dispatcher = tokio::spawn({
            let channels = Arc::clone(&channels);
            async move {
                while let Some(notification) = notifications.next().await {
                    let Ok(senders) = channels.lock() else { break };
                    if let Some(sender) = senders.get(&notification.uuid) {
                        if sender.send(notification.value).is_err() {
                            warn!("dropping notification for closed {}", notification.uuid);
                        }
                    }
                }
            }
        });

        Ok(Self {
            peripheral,
            channels,
            dispatcher,
        })
    }

    fn characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<btleplug::api::Characteristic, BlackbirdError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(BlackbirdError::MissingCharacteristic(uuid))
    }
}

impl GattLink for BleConnection {
    async fn write_char(
        &self,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BlackbirdError> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BlackbirdError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.channels.lock() {
            senders.insert(characteristic, sender);
        }
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(receiver)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), BlackbirdError> {
        if let Ok(mut senders) = self.channels.lock() {
            senders.remove(&characteristic);
        }
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BlackbirdError> {
        self.dispatcher.abort();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Scriptable in-memory link: tests queue notification packets and
    /// inspect every write the engine performs.
    #[derive(Debug, Default)]
    pub(crate) struct FakeLink {
        senders: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
        pending: Mutex<HashMap<Uuid, Vec<Vec<u8>>>>,
        written: Mutex<Vec<(Uuid, Vec<u8>)>>,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl FakeLink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a notification packet, delivered on subscribe if the
        /// characteristic is not yet subscribed.
        pub fn notify(&self, characteristic: Uuid, packet: Vec<u8>) {
            let senders = self.senders.lock().unwrap();
            match senders.get(&characteristic) {
                Some(sender) => sender.send(packet).unwrap(),
                None => self
                    .pending
                    .lock()
                    .unwrap()
                    .entry(characteristic)
                    .or_default()
                    .push(packet),
            }
        }

        pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
            self.written.lock().unwrap().clone()
        }

        /// Makes every following write fail, as a rejected GATT write
        /// would.
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes
                .store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl GattLink for FakeLink {
        async fn write_char(
            &self,
            characteristic: Uuid,
            payload: &[u8],
        ) -> Result<(), BlackbirdError> {
            if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(BlackbirdError::TransportClosed);
            }
            self.written
                .lock()
                .unwrap()
                .push((characteristic, payload.to_vec()));
            Ok(())
        }

        async fn subscribe(
            &self,
            characteristic: Uuid,
        ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BlackbirdError> {
            let (sender, receiver) = mpsc::unbounded_channel();
            for packet in self
                .pending
                .lock()
                .unwrap()
                .remove(&characteristic)
                .unwrap_or_default()
            {
                sender.send(packet).unwrap();
            }
            self.senders
                .lock()
                .unwrap()
                .insert(characteristic, sender);
            Ok(receiver)
        }

        async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), BlackbirdError> {
            self.senders.lock().unwrap().remove(&characteristic);
            Ok(())
        }

        fn settle_delay(&self) -> Duration {
            Duration::ZERO
        }
    }
}
