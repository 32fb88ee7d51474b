use bytes::Bytes;
use serde_json::Value;

/// Named response adapters, referenced by routes. A route without an
/// adapter passes the backend body through byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterId {
    /// Bare truck array -> legacy `{message, trucks}` envelope
    TruckList,

    /// Flat truck object -> legacy `{message, truck}` envelope
    TruckSingle,

    /// Bare expense array -> legacy `{message, expenses}` envelope
    ExpenseList,

    /// Bare alert array -> legacy `{message, alerts}` envelope
    AlertList,
}

/// Reshape a backend body into the legacy envelope its inbound route
/// historically returned. Total for well-formed backend responses; an
/// unexpected shape degrades to passthrough of the raw body rather than
/// failing the request, so the adapter layer never becomes its own source
/// of outages.
pub fn adapt(id: AdapterId, body: &Bytes, _query: &str) -> Bytes {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return body.clone(),
    };

    let adapted = match id {
        AdapterId::TruckList => list_envelope(parsed, "Trucks retrieved successfully", "trucks"),
        AdapterId::TruckSingle => single_envelope(parsed, "Truck retrieved successfully", "truck"),
        AdapterId::ExpenseList => {
            list_envelope(parsed, "Expenses retrieved successfully", "expenses")
        }
        AdapterId::AlertList => list_envelope(parsed, "Alerts retrieved successfully", "alerts"),
    };

    match adapted {
        Some(value) => match serde_json::to_vec(&value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => body.clone(),
        },
        None => body.clone(),
    }
}

/// Wrap a bare array under `{message, <key>: [...]}`, renaming `_id` to
/// `id` on each element
fn list_envelope(parsed: Value, message: &str, key: &str) -> Option<Value> {
    let Value::Array(items) = parsed else {
        return None;
    };

    let items = items.into_iter().map(rename_id).collect::<Vec<_>>();

    Some(serde_json::json!({
        "message": message,
        key: items,
    }))
}

/// Wrap a flat object under `{message, <key>: {...}}`, renaming `_id` to `id`
fn single_envelope(parsed: Value, message: &str, key: &str) -> Option<Value> {
    if !parsed.is_object() {
        return None;
    }

    Some(serde_json::json!({
        "message": message,
        key: rename_id(parsed),
    }))
}

/// Rename the canonical `_id` field to the legacy `id`, leaving everything
/// else untouched. Non-objects pass through unchanged.
fn rename_id(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(id) = map.remove("_id") {
                map.insert("id".to_string(), id);
            }
            Value::Object(map)
        }
        other => other,
    }
}
