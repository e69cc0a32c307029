//! Lock-free event rings between the message thread and the audio thread.
//!
//! Every entry is a fixed header (port, payload size, protocol) followed by
//! the payload, pushed with a single `push_slice` so a reader never observes
//! a partial entry.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use lv2_raw::LV2Urid;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::BridgeConfig;
use crate::error::{HostError, Result};

pub const EVENT_HEADER_BYTES: usize = 12;
/// Payload is a single native-endian `f32`.
pub const FLOAT_PROTOCOL: u32 = 0;

const FLOAT_EVENT_BYTES: usize = EVENT_HEADER_BYTES + std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub port: u32,
    pub size: u32,
    pub protocol: u32,
}

impl EventHeader {
    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.port.to_ne_bytes());
        out[4..8].copy_from_slice(&self.size.to_ne_bytes());
        out[8..12].copy_from_slice(&self.protocol.to_ne_bytes());
    }

    fn decode(bytes: &[u8; EVENT_HEADER_BYTES]) -> Self {
        let word = |at: usize| u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Self {
            port: word(0),
            size: word(4),
            protocol: word(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Float,
    EventTransfer,
    Other(u32),
}

/// One drained entry. The payload borrows the reader's staging buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortEvent<'a> {
    pub port: u32,
    pub protocol: u32,
    pub payload: &'a [u8],
}

impl PortEvent<'_> {
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn protocol_kind(&self, event_transfer: LV2Urid) -> Protocol {
        match self.protocol {
            FLOAT_PROTOCOL => Protocol::Float,
            id if id == event_transfer && id != 0 => Protocol::EventTransfer,
            id => Protocol::Other(id),
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        if self.protocol != FLOAT_PROTOCOL {
            return None;
        }
        let bytes: [u8; 4] = self.payload.try_into().ok()?;
        Some(f32::from_ne_bytes(bytes))
    }
}

#[derive(Debug, Default)]
pub struct BridgeStats {
    dropped: AtomicU64,
}

impl BridgeStats {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ring capacity large enough for `events_per_port` float events on every
/// port, and never smaller than one maximal event.
pub fn bridge_capacity(port_count: u32, config: &BridgeConfig) -> usize {
    let floats = port_count as usize * config.events_per_port * FLOAT_EVENT_BYTES;
    floats.max(EVENT_HEADER_BYTES + config.payload_ceiling)
}

pub fn event_bridge(capacity: usize, payload_ceiling: usize) -> (EventWriter, EventReader) {
    let capacity = capacity.max(EVENT_HEADER_BYTES + payload_ceiling);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    let stats = Arc::new(BridgeStats::default());
    (
        EventWriter {
            producer,
            frame: vec![0; EVENT_HEADER_BYTES + payload_ceiling],
            payload_ceiling,
            stats,
        },
        EventReader {
            consumer,
            payload: vec![0; payload_ceiling],
        },
    )
}

pub struct EventWriter {
    producer: HeapProd<u8>,
    frame: Vec<u8>,
    payload_ceiling: usize,
    stats: Arc<BridgeStats>,
}

impl EventWriter {
    /// Enqueues one event or refuses it whole; the refused write counts as dropped.
    pub fn try_write(&mut self, port: u32, protocol: u32, payload: &[u8]) -> Result<()> {
        let total = EVENT_HEADER_BYTES + payload.len();
        if payload.len() > self.payload_ceiling || self.producer.vacant_len() < total {
            self.stats.record_drop();
            return Err(HostError::RingOverflow {
                port,
                size: payload.len(),
            });
        }
        EventHeader {
            port,
            size: payload.len() as u32,
            protocol,
        }
        .encode(&mut self.frame[..EVENT_HEADER_BYTES]);
        self.frame[EVENT_HEADER_BYTES..total].copy_from_slice(payload);
        self.producer.push_slice(&self.frame[..total]);
        Ok(())
    }

    pub fn write(&mut self, port: u32, protocol: u32, payload: &[u8]) -> bool {
        self.try_write(port, protocol, payload).is_ok()
    }

    pub fn write_float(&mut self, port: u32, value: f32) -> bool {
        self.write(port, FLOAT_PROTOCOL, &value.to_ne_bytes())
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }
}

/// Message-thread entry into an instance's inbound ring.
///
/// The ring itself is replaced on every instantiation; clones and weak
/// handles keep working across that.
#[derive(Clone)]
pub struct PortWriter {
    ring: Arc<Mutex<Option<EventWriter>>>,
    port_count: u32,
}

impl PortWriter {
    pub fn new(port_count: u32) -> Self {
        Self {
            ring: Arc::new(Mutex::new(None)),
            port_count,
        }
    }

    pub fn attach(&self, writer: Option<EventWriter>) {
        *self.ring.lock() = writer;
    }

    /// Drops the event when the port does not exist, no ring is attached,
    /// or the ring is full.
    pub fn write(&self, port: u32, protocol: u32, payload: &[u8]) -> bool {
        if port >= self.port_count {
            return false;
        }
        self.ring
            .lock()
            .as_mut()
            .is_some_and(|writer| writer.write(port, protocol, payload))
    }

    pub fn write_float(&self, port: u32, value: f32) -> bool {
        self.write(port, FLOAT_PROTOCOL, &value.to_ne_bytes())
    }

    pub fn downgrade(&self) -> WeakPortWriter {
        WeakPortWriter {
            ring: Arc::downgrade(&self.ring),
            port_count: self.port_count,
        }
    }
}

#[derive(Clone)]
pub struct WeakPortWriter {
    ring: Weak<Mutex<Option<EventWriter>>>,
    port_count: u32,
}

impl WeakPortWriter {
    pub fn upgrade(&self) -> Option<PortWriter> {
        Some(PortWriter {
            ring: self.ring.upgrade()?,
            port_count: self.port_count,
        })
    }
}

pub struct EventReader {
    consumer: HeapCons<u8>,
    payload: Vec<u8>,
}

impl EventReader {
    pub fn pending_bytes(&self) -> usize {
        self.consumer.occupied_len()
    }

    fn pop_header(&mut self) -> Option<EventHeader> {
        if self.consumer.occupied_len() < EVENT_HEADER_BYTES {
            return None;
        }
        let mut header = [0_u8; EVENT_HEADER_BYTES];
        self.consumer.pop_slice(&mut header);
        Some(EventHeader::decode(&header))
    }

    /// Pops the oldest entry.
    pub fn read(&mut self) -> Option<PortEvent<'_>> {
        let header = self.pop_header()?;
        let size = header.size as usize;
        if size > self.payload.len() {
            self.consumer.skip(size);
            return None;
        }
        let popped = self.consumer.pop_slice(&mut self.payload[..size]);
        Some(PortEvent {
            port: header.port,
            protocol: header.protocol,
            payload: &self.payload[..popped],
        })
    }

    /// Drains what was pending when the call started, leaving later writes
    /// for the next call. Returns the number of events delivered.
    pub fn drain(&mut self, mut f: impl FnMut(PortEvent<'_>)) -> usize {
        let mut budget = self.consumer.occupied_len();
        let mut delivered = 0;
        while budget >= EVENT_HEADER_BYTES {
            let Some(header) = self.pop_header() else {
                break;
            };
            let size = header.size as usize;
            budget = budget.saturating_sub(EVENT_HEADER_BYTES + size);
            if size > self.payload.len() {
                self.consumer.skip(size);
                continue;
            }
            let popped = self.consumer.pop_slice(&mut self.payload[..size]);
            f(PortEvent {
                port: header.port,
                protocol: header.protocol,
                payload: &self.payload[..popped],
            });
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_fits_every_float_event() {
        let config = BridgeConfig {
            events_per_port: 4,
            payload_ceiling: 32,
        };
        assert_eq!(bridge_capacity(3, &config), 3 * 4 * 16);
        assert_eq!(bridge_capacity(0, &config), EVENT_HEADER_BYTES + 32);

        let (mut writer, _reader) = event_bridge(bridge_capacity(3, &config), 32);
        for n in 0..12 {
            assert!(writer.write_float(n % 3, n as f32), "event {n}");
        }
        assert!(!writer.write_float(0, 99.0));
        assert_eq!(writer.stats().dropped(), 1);
    }

    #[test]
    fn events_arrive_whole_and_in_order() {
        let (mut writer, mut reader) = event_bridge(256, 64);
        assert!(writer.write_float(2, 0.25));
        assert!(writer.write(5, 77, b"hello"));
        assert!(writer.write(6, 77, &[]));

        let first = reader.read().unwrap();
        assert_eq!(first.port, 2);
        assert_eq!(first.as_float(), Some(0.25));
        assert_eq!(first.protocol_kind(77), Protocol::Float);

        let second = reader.read().unwrap();
        assert_eq!((second.port, second.size()), (5, 5));
        assert_eq!(second.payload, b"hello");
        assert_eq!(second.protocol_kind(77), Protocol::EventTransfer);
        assert_eq!(second.as_float(), None);

        let third = reader.read().unwrap();
        assert_eq!(third.size(), 0);
        assert_eq!(third.protocol_kind(78), Protocol::Other(77));
        assert!(reader.read().is_none());
    }

    #[test]
    fn oversized_payload_is_dropped() {
        let (mut writer, mut reader) = event_bridge(1024, 8);
        assert!(matches!(
            writer.try_write(1, 9, &[0; 9]),
            Err(HostError::RingOverflow { port: 1, size: 9 })
        ));
        assert_eq!(reader.pending_bytes(), 0);
        assert_eq!(writer.stats().dropped(), 1);
    }

    #[test]
    fn drain_is_bounded_by_pending_at_start() {
        let (mut writer, mut reader) = event_bridge(256, 16);
        writer.write_float(0, 1.0);
        writer.write_float(1, 2.0);
        let mut seen = vec![];
        let delivered = reader.drain(|event| seen.push((event.port, event.as_float())));
        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![(0, Some(1.0)), (1, Some(2.0))]);
        assert_eq!(reader.drain(|_| panic!("empty")), 0);
    }

    #[test]
    fn port_writer_validates_and_follows_attachment() {
        let ports = PortWriter::new(2);
        assert!(!ports.write_float(0, 1.0));

        let (writer, mut reader) = event_bridge(128, 16);
        ports.attach(Some(writer));
        let weak = ports.downgrade();
        assert!(ports.write_float(1, 0.5));
        assert!(!ports.write_float(2, 0.5));
        assert!(weak.upgrade().is_some_and(|w| w.write_float(0, 0.25)));
        assert_eq!(reader.drain(|_| {}), 2);

        drop(ports);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn ring_wraps_without_tearing() {
        let (mut writer, mut reader) = event_bridge(EVENT_HEADER_BYTES * 2 + 10, 10);
        for round in 0..50_u8 {
            let payload = [round; 7];
            assert!(writer.write(u32::from(round), 1, &payload));
            let event = reader.read().unwrap();
            assert_eq!(event.port, u32::from(round));
            assert_eq!(event.payload, &payload);
        }
    }
}
