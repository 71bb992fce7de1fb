use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        ValueNotification, WriteType,
    },
    platform::{Adapter, Manager, Peripheral, PeripheralId},
};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{DeskAddress, DeskConfig},
    error::{ConnectError, WriteError},
    protocol::{parse_height, Channel, Command},
    transport::{Connected, DeskTransport, EventSender, LinkId, LinkIds, TransportEvent},
    types::TimeoutConfig,
    COMMAND_CHAR_UUID, HEIGHT_CHAR_UUID, REFERENCE_INPUT_CHAR_UUID,
};

/// How often the peripheral list is checked while scanning
const SCAN_POLL: Duration = Duration::from_millis(250);

/// [`DeskTransport`] over a real Bluetooth adapter
///
/// Holds at most one link. Connecting again replaces the previous link, and
/// nothing reconnects on its own.
pub struct BleTransport {
    adapter: Adapter,
    address: DeskAddress,
    timeouts: TimeoutConfig,
    ids: LinkIds,
    link: Mutex<Option<Link>>,
}

impl BleTransport {
    /// Pick an adapter for the configured desk
    ///
    /// Uses the adapter whose description contains `config.adapter` when set,
    /// otherwise the first one the platform reports.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::AdapterUnavailable`] if the host has no adapter,
    /// or [`ConnectError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn new(config: &DeskConfig) -> Result<Self, ConnectError> {
        let manager = Manager::new().await?;
        let adapter = select_adapter(&manager, config.adapter.as_deref()).await?;

        Ok(Self {
            adapter,
            address: config.address.clone(),
            timeouts: config.timeouts.clone(),
            ids: LinkIds::new(),
            link: Mutex::new(None),
        })
    }

    /// Scan until the configured desk shows up or the scan timeout passes
    async fn find_peripheral(&self) -> Result<Peripheral, ConnectError> {
        if let Some(peripheral) = self.known_peripheral().await? {
            return Ok(peripheral);
        }

        info!("Scanning for desk {}...", self.address);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + Duration::from_millis(self.timeouts.scan_timeout_ms);
        let found = loop {
            if let Some(peripheral) = self.known_peripheral().await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| ConnectError::DeviceNotFound {
            address: self.address.to_string(),
        })
    }

    async fn known_peripheral(&self) -> Result<Option<Peripheral>, ConnectError> {
        Ok(self.adapter.peripherals().await?.into_iter().find(|p| {
            self.address
                .matches(&p.address().to_string(), &p.id().to_string())
        }))
    }

    async fn open(&self, peripheral: Peripheral, events: EventSender) -> Result<(Link, i32), ConnectError> {
        if !peripheral.is_connected().await? {
            let timeout_ms = self.timeouts.connect_timeout_ms;
            timeout(Duration::from_millis(timeout_ms), peripheral.connect())
                .await
                .map_err(|_| ConnectError::Timeout { timeout_ms })??;
        }

        debug!("Discovering services on {}", peripheral.id());
        peripheral.discover_services().await?;

        let height = find_characteristic(&peripheral, HEIGHT_CHAR_UUID)?;
        let command = find_characteristic(&peripheral, COMMAND_CHAR_UUID)?;
        let reference_input = find_characteristic(&peripheral, REFERENCE_INPUT_CHAR_UUID)?;

        peripheral.subscribe(&height).await?;

        let initial = peripheral.read(&height).await?;
        let sample = parse_height(&initial).ok_or(ConnectError::MalformedHeight {
            len: initial.len(),
        })?;

        let id = self.ids.next();
        let notifications = peripheral.notifications().await?;
        let central_events = self.adapter.events().await?;
        let tasks = vec![
            tokio::spawn(pump_notifications(id, notifications, height.uuid, events.clone())),
            tokio::spawn(watch_disconnect(id, peripheral.id(), central_events, events)),
        ];

        let link = Link {
            id,
            peripheral,
            command,
            reference_input,
            tasks,
        };

        // Controllers in standby ignore movement until woken
        if let Err(e) = link.write(Command::WakeUp, self.timeouts.write_timeout_ms).await {
            warn!("Failed to wake desk: {}", e);
        }

        Ok((link, sample.height_mm))
    }
}

#[async_trait]
impl DeskTransport for BleTransport {
    async fn connect(&self, events: EventSender) -> Result<Connected, ConnectError> {
        let mut slot = self.link.lock().await;
        if let Some(previous) = slot.take() {
            previous.close().await;
        }

        let peripheral = self.find_peripheral().await?;
        info!("Connecting to desk {}", self.address);

        let (link, height_mm) = match self.open(peripheral.clone(), events).await {
            Ok(opened) => opened,
            Err(e) => {
                // Don't leave a half-open connection behind
                if let Err(err) = peripheral.disconnect().await {
                    debug!("Cleanup disconnect failed: {}", err);
                }
                return Err(e);
            }
        };

        let connected = Connected {
            link: link.id,
            height_mm,
        };
        info!("Connected to desk {} ({})", self.address, link.id);
        *slot = Some(link);
        Ok(connected)
    }

    async fn write_command(&self, command: Command) -> Result<(), WriteError> {
        let slot = self.link.lock().await;
        let link = slot.as_ref().ok_or(WriteError::NotConnected)?;
        link.write(command, self.timeouts.write_timeout_ms).await
    }

    async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.close().await;
            info!("Disconnected from desk {}", self.address);
        }
    }
}

/// One established connection
struct Link {
    id: LinkId,
    peripheral: Peripheral,
    command: Characteristic,
    reference_input: Characteristic,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    async fn write(&self, command: Command, timeout_ms: u64) -> Result<(), WriteError> {
        for frame in command.frames() {
            let characteristic = match frame.channel {
                Channel::Command => &self.command,
                Channel::ReferenceInput => &self.reference_input,
            };
            debug!(
                "Writing {:02X?} to {} ({})",
                frame.payload.as_ref(),
                characteristic.uuid,
                command
            );

            timeout(
                Duration::from_millis(timeout_ms),
                self.peripheral
                    .write(characteristic, &frame.payload, WriteType::WithResponse),
            )
            .await
            .map_err(|_| WriteError::Timeout { timeout_ms })?
            .map_err(|e| WriteError::Rejected(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Failed to disconnect {}: {}", self.id, e);
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn select_adapter(manager: &Manager, hint: Option<&str>) -> Result<Adapter, ConnectError> {
    let adapters = manager.adapters().await?;

    if let Some(hint) = hint {
        for adapter in &adapters {
            let info = adapter.adapter_info().await.unwrap_or_default();
            if info.contains(hint) {
                info!("Using adapter {}", info);
                return Ok(adapter.clone());
            }
        }
        warn!("Adapter '{}' not found, using the first available", hint);
    }

    adapters
        .into_iter()
        .next()
        .ok_or(ConnectError::AdapterUnavailable)
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, ConnectError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(ConnectError::MissingCharacteristic { uuid })
}

/// Forward height notifications until the stream or the receiver goes away
async fn pump_notifications<S>(link: LinkId, mut notifications: S, height_uuid: Uuid, events: EventSender)
where
    S: Stream<Item = ValueNotification> + Unpin + Send,
{
    while let Some(notification) = notifications.next().await {
        if notification.uuid != height_uuid {
            continue;
        }

        match parse_height(&notification.value) {
            Some(sample) => {
                if events.send(TransportEvent::height(link, sample)).is_err() {
                    break;
                }
            }
            None => warn!(
                "Dropping malformed height notification ({} bytes)",
                notification.value.len()
            ),
        }
    }
    debug!("Notification stream for {} ended", link);
}

/// Report the link as lost when the adapter says our peripheral went away
async fn watch_disconnect<S>(link: LinkId, peripheral: PeripheralId, mut central: S, events: EventSender)
where
    S: Stream<Item = CentralEvent> + Unpin + Send,
{
    while let Some(event) = central.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
            if id == peripheral {
                warn!("Desk dropped {}", link);
                let _ = events.send(TransportEvent::disconnected(link));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::mm_to_raw, protocol::HeightSample, transport::LinkEvent};
    use tokio::sync::mpsc;

    fn notification(uuid: Uuid, value: Vec<u8>) -> ValueNotification {
        ValueNotification { uuid, value }
    }

    #[test]
    fn test_uuids() {
        assert_eq!(
            HEIGHT_CHAR_UUID.to_string(),
            "99fa0021-338a-1024-8a49-009c0215f78a"
        );
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "99fa0002-338a-1024-8a49-009c0215f78a"
        );
        assert_eq!(
            REFERENCE_INPUT_CHAR_UUID.to_string(),
            "99fa0031-338a-1024-8a49-009c0215f78a"
        );
    }

    #[tokio::test]
    async fn test_pump_forwards_height_notifications() {
        let raw = u16::try_from(mm_to_raw(900)).unwrap().to_le_bytes();
        let stream = futures::stream::iter(vec![
            notification(COMMAND_CHAR_UUID, vec![0x47, 0x00]),
            notification(HEIGHT_CHAR_UUID, vec![0x01]),
            notification(HEIGHT_CHAR_UUID, raw.to_vec()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pump_notifications(LinkId::new(7), stream, HEIGHT_CHAR_UUID, tx).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.link, LinkId::new(7));
        assert_eq!(event.kind, LinkEvent::Height(HeightSample::at(900)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_stops_when_receiver_is_gone() {
        let raw = u16::try_from(mm_to_raw(700)).unwrap().to_le_bytes();
        let stream = futures::stream::iter(vec![notification(HEIGHT_CHAR_UUID, raw.to_vec()); 3]);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        tokio_test::assert_ready!(tokio_test::task::spawn(pump_notifications(
            LinkId::new(1),
            stream,
            HEIGHT_CHAR_UUID,
            tx,
        ))
        .poll());
    }
}
