use serde::{Deserialize, Serialize};

/// One webhook call captured by the relay, to be replayed against the target.
///
/// The relay sends `headers` as a JSON object encoded into a string, and the
/// body as raw text. Fields missing from the frame decode to their empty
/// value. `method` and `path` are opaque here; the HTTP client is the only
/// thing that validates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryRecord {
    pub id: i64,
    pub account_id: i64,
    pub method: String,
    pub path: String,
    pub headers: String,
    pub body: String,
    pub status: String,
    pub created_at: String,
}

/// A decoded inbound frame: the record plus the relay's optional metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub record: DeliveryRecord,
    /// Account balance reported alongside the record. Advisory only; it is
    /// echoed into events and never drives behaviour.
    pub balance_sats: Option<i64>,
}

/// Wrapped form sent by current relay servers.
#[derive(Deserialize)]
struct Envelope {
    webhook: DeliveryRecord,
    #[serde(default)]
    balance_sats: Option<i64>,
}

/// Why an inbound frame could not be turned into a [`Delivery`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("malformed delivery record: {0}")]
    Record(#[source] serde_json::Error),
}

/// Decode one inbound frame.
///
/// Objects carrying a `webhook` key are read as the wrapped envelope
/// `{"webhook": {...}, "balance_sats": n}`; any other object is read as a bare
/// record, as older relay servers send them.
pub fn decode(payload: &[u8]) -> Result<Delivery, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(DecodeError::Json)?;

    let is_envelope = match &value {
        serde_json::Value::Object(map) => map.contains_key("webhook"),
        _ => return Err(DecodeError::NotAnObject),
    };

    if is_envelope {
        let envelope: Envelope = serde_json::from_value(value).map_err(DecodeError::Record)?;
        Ok(Delivery {
            record: envelope.webhook,
            balance_sats: envelope.balance_sats,
        })
    } else {
        let record: DeliveryRecord = serde_json::from_value(value).map_err(DecodeError::Record)?;
        Ok(Delivery {
            record,
            balance_sats: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_envelope() {
        let frame = br#"{
            "webhook": {
                "id": 7,
                "account_id": 3,
                "method": "POST",
                "path": "/hooks/a",
                "headers": "{\"X-Test\":\"1\"}",
                "body": "{}",
                "status": "pending",
                "created_at": "2024-05-01T12:00:00Z"
            },
            "balance_sats": 4200
        }"#;

        let delivery = decode(frame).unwrap();
        assert_eq!(delivery.balance_sats, Some(4200));
        assert_eq!(delivery.record.id, 7);
        assert_eq!(delivery.record.account_id, 3);
        assert_eq!(delivery.record.method, "POST");
        assert_eq!(delivery.record.path, "/hooks/a");
        assert_eq!(delivery.record.headers, r#"{"X-Test":"1"}"#);
        assert_eq!(delivery.record.body, "{}");
        assert_eq!(delivery.record.status, "pending");
    }

    #[test]
    fn decodes_bare_record() {
        let frame = br#"{"id":1,"method":"PUT","path":"/x","body":"hi"}"#;

        let delivery = decode(frame).unwrap();
        assert_eq!(delivery.balance_sats, None);
        assert_eq!(delivery.record.method, "PUT");
        assert_eq!(delivery.record.path, "/x");
        assert_eq!(delivery.record.body, "hi");
        assert_eq!(delivery.record.headers, "");
    }

    #[test]
    fn envelope_without_balance() {
        let frame = br#"{"webhook":{"method":"GET","path":"/"}}"#;
        let delivery = decode(frame).unwrap();
        assert_eq!(delivery.balance_sats, None);
        assert_eq!(delivery.record.method, "GET");
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)), "unexpected error: {err}");
    }

    #[test]
    fn rejects_non_object() {
        let err = decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject), "unexpected error: {err}");
    }

    #[test]
    fn rejects_wrong_field_types() {
        let err = decode(br#"{"webhook":{"method":42}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Record(_)), "unexpected error: {err}");

        let err = decode(br#"{"id":"seven"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Record(_)), "unexpected error: {err}");
    }
}
