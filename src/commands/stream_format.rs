//! Shared RESP shaping for stream replies.

use crate::resp::RespValue;
use crate::store::Entry;

/// Encodes entries as `[[id, [field, value, …]], …]`.
pub fn entries_to_resp(entries: &[Entry]) -> RespValue {
    let encoded = entries
        .iter()
        .map(|entry| {
            let mut flattened_fields = Vec::with_capacity(entry.fields.len() * 2);

            for (field, value) in &entry.fields {
                flattened_fields.push(RespValue::BulkString(field.clone()));
                flattened_fields.push(RespValue::BulkString(value.clone()));
            }

            RespValue::Array(vec![
                RespValue::BulkString(entry.id.clone()),
                RespValue::Array(flattened_fields),
            ])
        })
        .collect();

    RespValue::Array(encoded)
}
