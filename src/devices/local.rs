// MIT License - Copyright (c) 2026 rnet contributors

use std::time::Duration;

use tracing::debug;

use crate::client::Client;
use crate::devices::Activity;
use crate::devices::remote::split_packets;
use crate::devices::store::DataStore;
use crate::event::{BusEvent, EventSender};
use crate::id::RnetDeviceId;
use crate::message::{Event, Priority, RequestData, RnetMessage, SetData};
use crate::path::RnetPath;

/// The device representing this process on the bus.
///
/// Its data lives only in the local store. Other devices may request it;
/// the answer is sent as SetData packets without waiting for handshakes.
pub struct LocalDevice {
    id: RnetDeviceId,
    events: EventSender,
    store: DataStore,
    activity: Activity,
}

impl LocalDevice {
    pub fn new(id: RnetDeviceId, activity_timeout: Duration, events: EventSender) -> Self {
        Self {
            id,
            events,
            store: DataStore::new(),
            activity: Activity::new(activity_timeout),
        }
    }

    pub fn id(&self) -> RnetDeviceId {
        self.id
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn read(&self, path: &RnetPath) -> Option<Vec<u8>> {
        self.store.get(path).map(|v| v.data)
    }

    pub fn write(&self, path: RnetPath, data: &[u8]) -> bool {
        if self.store.store(path, data.to_vec()) {
            let _ = self.events.send(BusEvent::BufferChanged {
                device: self.id,
                path,
                data: data.to_vec(),
            });
        }
        true
    }

    /// Events raised on the local device go straight to bus subscribers.
    pub fn send_event(
        &self,
        path: RnetPath,
        event_code: u16,
        event_timestamp: u16,
        event_data: u16,
        priority: Priority,
    ) -> bool {
        let event = Event {
            target_path: path,
            source_path: RnetPath::EMPTY,
            event_code,
            event_timestamp,
            event_data,
            priority,
        };
        let _ = self.events.send(BusEvent::DeviceEvent {
            device: self.id,
            event,
        });
        true
    }

    /// Answer a RequestData from `requester` with the stored value.
    ///
    /// Nothing is sent when the path holds no value.
    pub(crate) async fn answer_request(&self, client: &Client, requester: RnetDeviceId, request: &RequestData) {
        let Some(data) = self.read(&request.target_path) else {
            debug!("No local data at [{}] for {}", request.target_path, requester);
            return;
        };
        let packets = split_packets(&data);
        let Ok(count) = u16::try_from(packets.len()) else {
            debug!("Local data at [{}] too large to send", request.target_path);
            return;
        };
        for (number, chunk) in packets.into_iter().enumerate() {
            let reply = RnetMessage::new(
                requester,
                self.id,
                SetData {
                    target_path: request.source_path,
                    source_path: request.target_path,
                    packet_number: number as u16,
                    packet_count: count,
                    data: chunk.to_vec(),
                },
            );
            if let Err(e) = client.send_if_open(reply).await {
                debug!("Could not answer {}: {}", requester, e);
                return;
            }
        }
    }
}
