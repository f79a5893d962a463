//! In-process event bus with Redis Streams semantics.
//!
//! Useful for tests and single-process runs. Entry ids follow the
//! `<millis>-<seq>` scheme and increase strictly within a stream. Consumer
//! groups keep a delivery cursor and a per-consumer pending list, exactly
//! like the broker: `>` delivers new entries and marks them pending, any
//! other offset replays the consumer's pending entries.
//!
//! State is guarded by a `std::sync::Mutex` that is never held across an
//! `.await`. Delivery state only changes once data has been found, so
//! dropping a blocked read leaves the group untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::bus::{
    EventBus, GroupOptions, OutboundMessage, ReadOptions, StreamMessage, StreamOffsets, LATEST_ID,
    UNDELIVERED_ID,
};
use crate::codec::{decode_fields, encode_message, EVENT_FIELD};
use crate::error::MessagingError;

/// A parsed `<millis>-<seq>` stream id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    fn next_after(self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self {
                millis: now_millis,
                seq: 0,
            }
        } else {
            Self {
                millis: self.millis,
                seq: self.seq + 1,
            }
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MessagingError::InvalidStreamId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, Some(seq)),
            None => (s, None),
        };
        let millis = millis.parse().map_err(|_| invalid())?;
        let seq = match seq {
            Some(seq) => seq.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { millis, seq })
    }
}

struct Entry {
    id: EntryId,
    fields: Vec<(String, String)>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: EntryId,
    /// Delivered but unacknowledged entries, with the consumer that holds each.
    pending: BTreeMap<EntryId, String>,
}

#[derive(Default)]
struct StreamLog {
    entries: Vec<Entry>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn entries_after(&self, after: EntryId) -> impl Iterator<Item = &Entry> {
        let start = self.entries.partition_point(|e| e.id <= after);
        self.entries[start..].iter()
    }

    fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(&id))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

fn take_limit(count: usize) -> usize {
    if count == 0 {
        usize::MAX
    } else {
        count
    }
}

fn to_message(stream: &str, entry: &Entry) -> Result<StreamMessage, MessagingError> {
    Ok(StreamMessage {
        stream: stream.to_string(),
        message_id: entry.id.to_string(),
        data: decode_fields(entry.fields.iter().cloned())?,
    })
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// In-memory implementation of [`EventBus`].
#[derive(Default)]
pub struct InMemoryEventBus {
    streams: Mutex<HashMap<String, StreamLog>>,
    appended: Notify,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamLog>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entries in `stream` (0 if it does not exist).
    pub fn stream_len(&self, stream: &str) -> usize {
        self.lock().get(stream).map_or(0, |log| log.entries.len())
    }

    /// Number of delivered but unacknowledged entries for `group`.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// Repeats `attempt` until it yields messages or the block window closes.
    async fn wait_for<F>(
        &self,
        block: Option<Duration>,
        mut attempt: F,
    ) -> Result<Vec<StreamMessage>, MessagingError>
    where
        F: FnMut(&mut HashMap<String, StreamLog>) -> Result<Vec<StreamMessage>, MessagingError>
            + Send,
    {
        let deadline = match block {
            None => return attempt(&mut *self.lock()),
            Some(d) if d.is_zero() => None,
            Some(d) => Some(Instant::now() + d),
        };

        loop {
            // Register for wake-ups before looking, so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let messages = attempt(&mut *self.lock())?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(
        &self,
        stream: &str,
        message: OutboundMessage,
    ) -> Result<String, MessagingError> {
        let encoded = encode_message(&message)?;
        let id = {
            let mut streams = self.lock();
            let log = streams.entry(stream.to_string()).or_default();
            let id = log.last_id.next_after(now_millis());
            log.entries.push(Entry {
                id,
                fields: vec![(EVENT_FIELD.to_string(), encoded)],
            });
            log.last_id = id;
            id
        };
        self.appended.notify_waiters();
        debug!(stream, message_id = %id, "published message");
        Ok(id.to_string())
    }

    async fn create_consumer_group(
        &self,
        stream: &str,
        group: &str,
        options: GroupOptions,
    ) -> Result<(), MessagingError> {
        let mut streams = self.lock();
        if !streams.contains_key(stream) {
            if !options.mkstream {
                return Err(MessagingError::NoSuchStream(stream.to_string()));
            }
            streams.insert(stream.to_string(), StreamLog::default());
        }
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| MessagingError::NoSuchStream(stream.to_string()))?;

        if log.groups.contains_key(group) {
            debug!(stream, group, "consumer group already exists");
            return Ok(());
        }

        let last_delivered = if options.start_id == LATEST_ID {
            log.last_id
        } else {
            options.start_id.parse()?
        };
        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        debug!(stream, group, start_id = %options.start_id, "created consumer group");
        Ok(())
    }

    async fn read(
        &self,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError> {
        // `$` is fixed to the last id at call time, as the broker does.
        let resolved: Vec<(String, EntryId)> = {
            let logs = self.lock();
            streams
                .iter()
                .map(|(stream, offset)| -> Result<(String, EntryId), MessagingError> {
                    let after = if offset == LATEST_ID {
                        logs.get(stream).map(|log| log.last_id).unwrap_or_default()
                    } else {
                        offset.parse()?
                    };
                    Ok((stream.to_string(), after))
                })
                .collect::<Result<_, MessagingError>>()?
        };
        let limit = take_limit(options.count);

        self.wait_for(options.block, |logs| {
            let mut messages = Vec::new();
            for (stream, after) in &resolved {
                let Some(log) = logs.get(stream) else {
                    continue;
                };
                for entry in log.entries_after(*after).take(limit) {
                    messages.push(to_message(stream, entry)?);
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError> {
        let requests: Vec<(String, Option<EntryId>)> = streams
            .iter()
            .map(|(stream, offset)| -> Result<(String, Option<EntryId>), MessagingError> {
                let replay_after = if offset == UNDELIVERED_ID {
                    None
                } else {
                    Some(offset.parse()?)
                };
                Ok((stream.to_string(), replay_after))
            })
            .collect::<Result<_, MessagingError>>()?;
        let limit = take_limit(options.count);

        // History reads never block, matching the broker.
        let block = if requests.iter().all(|(_, replay)| replay.is_none()) {
            options.block
        } else {
            None
        };

        let messages = self
            .wait_for(block, |logs| {
                // Validate every stream before touching delivery state.
                for (stream, _) in &requests {
                    let known = logs.get(stream).is_some_and(|log| log.groups.contains_key(group));
                    if !known {
                        return Err(MessagingError::NoSuchGroup {
                            stream: stream.clone(),
                            group: group.to_string(),
                        });
                    }
                }

                let mut messages = Vec::new();
                for (stream, replay_after) in &requests {
                    let Some(log) = logs.get_mut(stream) else {
                        continue;
                    };
                    match replay_after {
                        None => {
                            let Some(state) = log.groups.get(group) else {
                                continue;
                            };
                            let delivered: Vec<EntryId> = log
                                .entries_after(state.last_delivered)
                                .take(limit)
                                .map(|e| e.id)
                                .collect();
                            for id in &delivered {
                                if let Some(entry) = log.entry(*id) {
                                    messages.push(to_message(stream, entry)?);
                                }
                            }
                            if let Some(&last) = delivered.last() {
                                if let Some(state) = log.groups.get_mut(group) {
                                    state.last_delivered = last;
                                    for id in delivered {
                                        state.pending.insert(id, consumer.to_string());
                                    }
                                }
                            }
                        }
                        Some(after) => {
                            let Some(state) = log.groups.get(group) else {
                                continue;
                            };
                            let held: Vec<EntryId> = state
                                .pending
                                .range((std::ops::Bound::Excluded(*after), std::ops::Bound::Unbounded))
                                .filter(|(_, owner)| owner.as_str() == consumer)
                                .map(|(id, _)| *id)
                                .take(limit)
                                .collect();
                            for id in held {
                                if let Some(entry) = log.entry(id) {
                                    messages.push(to_message(stream, entry)?);
                                }
                            }
                        }
                    }
                }
                Ok(messages)
            })
            .await?;

        debug!(group, consumer, received = messages.len(), "read from consumer group");
        Ok(messages)
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        message_ids: &[String],
    ) -> Result<u64, MessagingError> {
        let ids = message_ids
            .iter()
            .map(|id| id.parse::<EntryId>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut streams = self.lock();
        let Some(state) = streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let mut acknowledged = 0u64;
        for id in &ids {
            if state.pending.remove(id).is_some() {
                acknowledged += 1;
            }
        }
        debug!(stream, group, requested = ids.len(), acknowledged, "acknowledged messages");
        Ok(acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_parse_and_order() {
        let a: EntryId = "1-0".parse().unwrap();
        let b: EntryId = "1-1".parse().unwrap();
        let c: EntryId = "2".parse().unwrap();

        assert!(a < b && b < c);
        assert_eq!(c.to_string(), "2-0");
        assert!("x-1".parse::<EntryId>().is_err());
        assert!("1-".parse::<EntryId>().is_err());
    }

    #[test]
    fn next_id_is_strictly_increasing() {
        let last = EntryId { millis: 10, seq: 3 };
        assert_eq!(last.next_after(5), EntryId { millis: 10, seq: 4 });
        assert_eq!(last.next_after(10), EntryId { millis: 10, seq: 4 });
        assert_eq!(last.next_after(11), EntryId { millis: 11, seq: 0 });
    }
}
