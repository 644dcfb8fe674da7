//! Append-only, per-stream event storage with optimistic concurrency.
//!
//! A stream's version is the number of events in it. [`EventStore::append`]
//! only succeeds when the caller's `expected_version` equals the stored one,
//! and writes the events and the new version atomically.
use crate::config::EventStoreConfig;
use crate::error::EventStoreError;
use crate::event::RecordedEvent;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

const EVENTS_TREE: &str = "offer_events";

pub trait EventStore: Send + Sync {
    /// All events of `stream` in sequence order. Unknown streams are empty.
    fn load(&self, stream: &str) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Append `events`, returning the stream's new version.
    fn append(
        &self,
        stream: &str,
        expected_version: u64,
        events: &[RecordedEvent],
    ) -> Result<u64, EventStoreError>;

    fn version(&self, stream: &str) -> Result<u64, EventStoreError>;

    /// Every stream holding at least one event.
    fn stream_keys(&self) -> Result<Vec<String>, EventStoreError>;
}

/// What actually lands in sled: the event's CBOR and its sha256 digest.
#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct StoredEvent {
    #[n(0)]
    digest: String,
    #[cbor(n(1), with = "minicbor::bytes")]
    payload: Vec<u8>,
}

pub struct SledEventStore {
    tree: sled::Tree,
}

impl SledEventStore {
    pub fn new(db: Arc<sled::Db>) -> Result<Self, EventStoreError> {
        Ok(Self {
            tree: db.open_tree(EVENTS_TREE)?,
        })
    }

    pub fn open(config: &EventStoreConfig) -> Result<Self, EventStoreError> {
        let mut sled_config = sled::Config::new().temporary(config.temporary);
        if let Some(path) = &config.path {
            sled_config = sled_config.path(path);
        }
        let db = sled_config.open()?;

        Self::new(Arc::new(db))
    }

    fn version_key(stream: &str) -> String {
        format!("v:{stream}")
    }

    fn event_prefix(stream: &str) -> String {
        format!("e:{stream}/")
    }

    fn event_key(stream: &str, sequence: u64) -> String {
        // zero padded so lexicographic order is sequence order
        format!("e:{stream}/{sequence:020}")
    }

    fn decode_version(stream: &str, bytes: &[u8]) -> Result<u64, EventStoreError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| EventStoreError::Corrupted {
            stream: stream.to_string(),
            sequence: 0,
        })?;

        Ok(u64::from_be_bytes(raw))
    }

    fn decode_event(stream: &str, sequence: u64, bytes: &[u8]) -> Result<RecordedEvent, EventStoreError> {
        let stored: StoredEvent = minicbor::decode(bytes)?;
        if sha256::digest(&stored.payload) != stored.digest {
            return Err(EventStoreError::Corrupted {
                stream: stream.to_string(),
                sequence,
            });
        }

        let event: RecordedEvent = minicbor::decode(&stored.payload)?;
        if event.sequence != sequence {
            return Err(EventStoreError::Corrupted {
                stream: stream.to_string(),
                sequence,
            });
        }

        Ok(event)
    }
}

impl EventStore for SledEventStore {
    fn load(&self, stream: &str) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let mut events = vec![];
        for (index, entry) in self.tree.scan_prefix(Self::event_prefix(stream)).enumerate() {
            let (_, value) = entry?;
            events.push(Self::decode_event(stream, index as u64 + 1, &value)?);
        }

        Ok(events)
    }

    fn append(
        &self,
        stream: &str,
        expected_version: u64,
        events: &[RecordedEvent],
    ) -> Result<u64, EventStoreError> {
        let mut records = Vec::with_capacity(events.len());
        for (offset, event) in events.iter().enumerate() {
            let sequence = expected_version + offset as u64 + 1;
            let (digest, payload) = event.build()?;
            let stored = minicbor::to_vec(StoredEvent { digest, payload })
                .map_err(|e| EventStoreError::Encode(e.to_string()))?;
            records.push((Self::event_key(stream, sequence), stored));
        }
        let new_version = expected_version + events.len() as u64;
        let version_key = Self::version_key(stream);

        let outcome = self.tree.transaction(|tx| {
            let current = match tx.get(version_key.as_bytes())? {
                Some(bytes) => Self::decode_version(stream, &bytes)
                    .map_err(ConflictableTransactionError::Abort)?,
                None => 0,
            };
            if current != expected_version {
                return Err(ConflictableTransactionError::Abort(EventStoreError::Conflict {
                    stream: stream.to_string(),
                    expected: expected_version,
                    current,
                }));
            }

            for (key, value) in &records {
                tx.insert(key.as_bytes(), value.as_slice())?;
            }
            tx.insert(version_key.as_bytes(), &new_version.to_be_bytes()[..])?;

            Ok(new_version)
        });

        match outcome {
            Ok(version) => {
                debug!(stream, version, appended = events.len(), "appended events");
                Ok(version)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn version(&self, stream: &str) -> Result<u64, EventStoreError> {
        match self.tree.get(Self::version_key(stream))? {
            Some(bytes) => Self::decode_version(stream, &bytes),
            None => Ok(0),
        }
    }

    fn stream_keys(&self) -> Result<Vec<String>, EventStoreError> {
        let mut keys = vec![];
        for entry in self.tree.scan_prefix("v:") {
            let (key, _) = entry?;
            if let Some(stream) = key.strip_prefix(b"v:") {
                keys.push(String::from_utf8_lossy(stream).into_owned());
            }
        }

        Ok(keys)
    }
}

/// Process-local store with the same contract as [`SledEventStore`].
#[derive(Default)]
pub struct MemoryEventStore {
    streams: RwLock<HashMap<String, Vec<RecordedEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn load(&self, stream: &str) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);

        Ok(streams.get(stream).cloned().unwrap_or_default())
    }

    fn append(
        &self,
        stream: &str,
        expected_version: u64,
        events: &[RecordedEvent],
    ) -> Result<u64, EventStoreError> {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let entries = streams.entry(stream.to_string()).or_default();

        let current = entries.len() as u64;
        if current != expected_version {
            return Err(EventStoreError::Conflict {
                stream: stream.to_string(),
                expected: expected_version,
                current,
            });
        }
        entries.extend_from_slice(events);

        Ok(entries.len() as u64)
    }

    fn version(&self, stream: &str) -> Result<u64, EventStoreError> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);

        Ok(streams.get(stream).map_or(0, |events| events.len() as u64))
    }

    fn stream_keys(&self) -> Result<Vec<String>, EventStoreError> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);

        Ok(streams
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }
}
