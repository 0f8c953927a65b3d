use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// A product interaction pulled off an event source.
///
/// `observed_at` is only honoured by replay; live ingestion stamps events
/// with the engine clock on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub product_id: String,
    pub event_type: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            event_type: None,
            observed_at: None,
        }
    }

    /// Extract an event from a decoded JSON object. Returns `None` when there
    /// is no usable product id (missing, empty, or not a string/number).
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let product_id = match obj.get("product_id")? {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let event_type = obj
            .get("event_type")
            .and_then(Value::as_str)
            .map(String::from);
        let observed_at = obj
            .get("observed_at")
            .or_else(|| obj.get("timestamp"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        Some(Self {
            product_id,
            event_type,
            observed_at,
        })
    }
}

/// Parse RFC 3339, falling back to a zone-less ISO-8601 string taken as UTC
/// (what most Python producers emit).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
