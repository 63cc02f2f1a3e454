use serde::{Deserialize, Serialize};

/// A single delivery event written to the event stream.
///
/// Optional fields are omitted from the serialised line when unset, so a
/// `webhook_received` line carries only what is known at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    #[serde(with = "rfc3339")]
    pub time: chrono::DateTime<chrono::Utc>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_sats: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl EventEntry {
    /// Create an entry stamped with the current UTC time. Every optional
    /// field starts out empty; use the `with_*` builders to fill them in.
    pub fn new(event: EventKind) -> Self {
        Self {
            time: chrono::Utc::now(),
            event,
            method: None,
            path: None,
            status_code: None,
            balance_sats: None,
            error: None,
            response: None,
        }
    }

    /// Attach the HTTP method and path of the delivery this event is about.
    pub fn with_request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Attach the account balance reported by the relay, if any.
    pub fn with_balance_sats(mut self, balance_sats: Option<i64>) -> Self {
        self.balance_sats = balance_sats;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// The lifecycle moment an [`EventEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WebhookReceived,
    WebhookForwarded,
    ForwardError,
}

/// Second-precision RFC 3339 timestamps (`2024-05-01T12:00:00Z`).
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
