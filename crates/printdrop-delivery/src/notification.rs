// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage-event notification decoding.
//
// Queue bodies are object-created events:
//
//   {"Records":[{"eventName":"ObjectCreated:Put",
//                "s3":{"bucket":{"name":"print-drop"},
//                      "object":{"key":"clients/acme/Q3+report.pdf"}}}]}
//
// Keys arrive form-encoded (`+` for space, `%XX` escapes).  Anything that does
// not match this shape (test events, plain text) decodes to
// `Notification::Invalid` and is never retried.

use serde::Deserialize;

use printdrop_core::types::ObjectLocator;

/// Decoded queue message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Valid(ObjectLocator),
    /// The payload cannot become valid on redelivery; the reason is for logs.
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records")]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Decode a raw queue message body.  Only the first record is used.
pub fn parse_notification(body: &str) -> Notification {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return Notification::Invalid(format!("not a storage event: {e}")),
    };

    let Some(record) = envelope.records.into_iter().next() else {
        return Notification::Invalid("storage event has no records".into());
    };

    let raw_key = record.s3.object.key.replace('+', " ");
    match urlencoding::decode(&raw_key) {
        Ok(key) if !key.is_empty() => {
            Notification::Valid(ObjectLocator::new(record.s3.bucket.name, key.into_owned()))
        }
        Ok(_) => Notification::Invalid("storage event has an empty object key".into()),
        Err(e) => Notification::Invalid(format!("object key is not valid UTF-8: {e}")),
    }
}

/// Build the object-created event body announcing `key` in `container`.
#[cfg(test)]
pub(crate) fn object_created_event(container: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    serde_json::json!({
        "Records": [{
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": { "name": container },
                "object": { "key": encoded.join("/") }
            }
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_encoded_key() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"print-drop"},
                        "object":{"key":"clients/acme/Q3+report%28final%29.pdf"}}}]}"#;
        assert_eq!(
            parse_notification(body),
            Notification::Valid(ObjectLocator::new(
                "print-drop",
                "clients/acme/Q3 report(final).pdf"
            ))
        );
    }

    #[test]
    fn test_event_is_invalid() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"print-drop"}"#;
        assert!(matches!(parse_notification(body), Notification::Invalid(_)));
    }

    #[test]
    fn non_json_and_empty_records_are_invalid() {
        assert!(matches!(parse_notification("hello"), Notification::Invalid(_)));
        assert!(matches!(
            parse_notification(r#"{"Records":[]}"#),
            Notification::Invalid(_)
        ));
        assert!(matches!(
            parse_notification(r#"{"Records":[{"s3":{"bucket":{}}}]}"#),
            Notification::Invalid(_)
        ));
    }

    #[test]
    fn bad_escape_is_invalid() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"clients/a/%FF.pdf"}}}]}"#;
        assert!(matches!(parse_notification(body), Notification::Invalid(_)));
    }

    #[test]
    fn built_events_parse_back_to_the_same_key() {
        let body = object_created_event("print-drop", "clients/acme/50% off+flyer.pdf");
        assert_eq!(
            parse_notification(&body),
            Notification::Valid(ObjectLocator::new(
                "print-drop",
                "clients/acme/50% off+flyer.pdf"
            ))
        );
    }
}
