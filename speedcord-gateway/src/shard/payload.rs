//! Outbound frame payloads: IDENTIFY, RESUME, HEARTBEAT.

use serde::Serialize;

use crate::intents::Intents;

#[derive(Serialize)]
pub struct Identify {
    pub op: u8,
    pub d: IdentifyData,
}

#[derive(Serialize)]
pub struct IdentifyData {
    pub token: String,
    pub properties: IdentifyProperties,
    pub intents: i64,
    pub shard: (u32, u32),
}

#[derive(Serialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: &'static str,
    #[serde(rename = "$browser")]
    pub browser: &'static str,
    #[serde(rename = "$device")]
    pub device: &'static str,
}

/// Builds the IDENTIFY frame (op=2) for `shard_id` of `total_shard_count`.
pub fn identify(token: &str, intents: Intents, shard_id: u32, total_shard_count: u32) -> Identify {
    Identify {
        op: 2,
        d: IdentifyData {
            token: token.to_owned(),
            properties: IdentifyProperties {
                os: std::env::consts::OS,
                browser: "SpeedCord",
                device: "SpeedCord",
            },
            intents: intents.bits_as_i64(),
            shard: (shard_id, total_shard_count),
        },
    }
}

#[derive(Serialize)]
pub struct Resume {
    pub op: u8,
    pub d: ResumeData,
}

#[derive(Serialize)]
pub struct ResumeData {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

/// Builds the RESUME frame (op=6).
pub fn resume(token: &str, session_id: &str, last_event_sequence: Option<u64>) -> Resume {
    Resume {
        op: 6,
        d: ResumeData {
            token: token.to_owned(),
            session_id: session_id.to_owned(),
            seq: last_event_sequence,
        },
    }
}

#[derive(Serialize)]
pub struct Heartbeat {
    pub op: u8,
    pub d: Option<u64>,
}

/// Builds the HEARTBEAT frame (op=1). `sequence` is `None` on the very
/// first heartbeat of a session, then the incrementing counter thereafter.
pub fn heartbeat(sequence: Option<u64>) -> Heartbeat {
    Heartbeat { op: 1, d: sequence }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_serializes_shard_as_pair() {
        let payload = identify("tok", Intents::GUILDS, 2, 8);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["shard"], serde_json::json!([2, 8]));
        assert_eq!(value["d"]["properties"]["$browser"], "SpeedCord");
    }

    #[test]
    fn resume_carries_session_and_seq() {
        let payload = resume("tok", "sess-1", Some(42));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["op"], 6);
        assert_eq!(value["d"]["session_id"], "sess-1");
        assert_eq!(value["d"]["seq"], 42);
    }

    #[test]
    fn heartbeat_with_no_prior_sequence_sends_null() {
        let payload = heartbeat(None);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["d"], serde_json::Value::Null);
    }
}
