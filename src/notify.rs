use crate::queue::{Message, ReceiptHandle};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One newly arrived source object, handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub bucket: String,
    pub key: String,
    pub expected_size: u64,
    pub receipt: ReceiptHandle,
}

/// Storage event payload: `{"Records": [{"s3": {"bucket": .., "object": ..}}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Events {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

pub fn decode_events(payload: &str) -> Result<Vec<EventRecord>> {
    let events: Events = serde_json::from_str(payload).with_context(|| "decoding storage event")?;
    Ok(events.records)
}

/// Query-style unescape: `+` is a space, then percent-decoding.
pub fn unescape_key(key: &str) -> Result<String> {
    let spaced = key.replace('+', " ");
    let decoded = urlencoding::decode(&spaced).with_context(|| format!("unescaping key {key}"))?;
    Ok(decoded.into_owned())
}

/// Turns a queue message into a notification. `Ok(None)` means the payload is
/// well formed but does not carry exactly one record.
pub fn from_message(message: &Message) -> Result<Option<Notification>> {
    let records = decode_events(&message.payload)?;
    let [record] = records.as_slice() else {
        return Ok(None);
    };
    Ok(Some(Notification {
        bucket: record.s3.bucket.name.clone(),
        key: unescape_key(&record.s3.object.key)?,
        expected_size: record.s3.object.size,
        receipt: message.receipt.clone(),
    }))
}

/// Builds the payload a storage service would send for one new object.
pub fn event_payload(bucket: &str, key: &str, size: u64) -> String {
    let events = Events {
        records: vec![EventRecord {
            s3: S3Entity {
                bucket: BucketEntity { name: bucket.into() },
                object: ObjectEntity {
                    key: urlencoding::encode(key).into_owned(),
                    size,
                },
            },
        }],
    };
    serde_json::to_string(&events).unwrap_or_default()
}
