// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Frame decoder
//
// Pulls complete blank-line-delimited messages out of accumulated stream
// text. Pure: no state beyond the buffer handed in, so the caller owns the
// remainder and feeds it back with the next chunk.
//
// Wire format:
//   event: <type>\n
//   data: <payload>\n
//   \n
// or a plain `data: <payload>\n\n`. Either prefix may omit the space.

use super::types::{DecodedEvent, EventKind, Payload};

/// Separates complete messages.
pub const FRAME_DELIMITER: &str = "\n\n";

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// Result of one decode pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Complete events, in the order their delimiters closed them.
    pub events: Vec<DecodedEvent>,
    /// Text after the last delimiter. Possibly the head of a message that
    /// is still arriving.
    pub remainder: String,
    /// Non-empty complete segments that matched neither message shape.
    pub dropped: usize,
}

/// Decode every delimiter-bounded message in `buffer`.
///
/// The final segment is never decoded, even when non-empty: without a
/// trailing delimiter it may be a truncated message.
pub fn decode(buffer: &str) -> Decoded {
    let mut segments: Vec<&str> = buffer.split(FRAME_DELIMITER).collect();
    let remainder = segments.pop().unwrap_or_default().to_string();

    let mut events = Vec::with_capacity(segments.len());
    let mut dropped = 0;

    for segment in segments {
        match decode_segment(segment) {
            Some(event) => events.push(event),
            None if segment.is_empty() => {}
            None => {
                dropped += 1;
                tracing::debug!(
                    segment_len = segment.len(),
                    "dropping unrecognized stream segment"
                );
            }
        }
    }

    Decoded {
        events,
        remainder,
        dropped,
    }
}

/// Decode one complete segment, or `None` if it has no recognizable shape.
fn decode_segment(segment: &str) -> Option<DecodedEvent> {
    let mut lines = segment.split('\n');
    let first = lines.next()?;

    if let Some(tag) = first.strip_prefix(EVENT_PREFIX) {
        let payload = strip_field(lines.next()?, DATA_PREFIX)?;
        let kind = EventKind::from_tag(strip_one_space(tag));
        let payload = match serde_json::from_str(payload) {
            Ok(value) => Payload::Json(value),
            Err(e) => Payload::Malformed {
                diagnostic: e.to_string(),
                raw: payload.to_string(),
            },
        };
        return Some(DecodedEvent::new(kind, payload));
    }

    let payload = strip_field(first, DATA_PREFIX)?;
    let payload = match serde_json::from_str(payload) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Text(payload.to_string()),
    };
    Some(DecodedEvent::new(EventKind::Data, payload))
}

fn strip_field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(strip_one_space)
}

fn strip_one_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

/// Encode an event into its wire form, delimiter included.
///
/// `Data` events use the plain one-line shape; every other kind is written
/// with an `event:` line. Text payloads are written as-is and must not
/// contain a blank line.
pub fn encode(event: &DecodedEvent) -> String {
    let payload = match &event.payload {
        Payload::Json(value) => value.to_string(),
        Payload::Text(text) => text.clone(),
        Payload::Malformed { raw, .. } => raw.clone(),
    };
    match event.kind {
        EventKind::Data => format!("{DATA_PREFIX} {payload}{FRAME_DELIMITER}"),
        ref kind => format!("{EVENT_PREFIX} {kind}\n{DATA_PREFIX} {payload}{FRAME_DELIMITER}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_data_message_decodes_json() {
        let out = decode("data: {\"message\":\"test\",\"count\":42}\n\n");
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].kind, EventKind::Data);
        assert_eq!(
            out.events[0].json(),
            Some(&json!({"message": "test", "count": 42}))
        );
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn typed_message_keeps_tag_verbatim() {
        let out = decode("event: search_response\ndata: {\"hits\":[],\"total\":100}\n\n");
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].kind.as_str(), "search_response");
        assert_eq!(out.events[0].json(), Some(&json!({"hits": [], "total": 100})));
    }

    #[test]
    fn known_tags_map_to_variants() {
        let out = decode(
            "event: search_response_hits\ndata: {}\n\nevent:search_response_metadata\ndata:{}\n\n",
        );
        assert_eq!(out.events[0].kind, EventKind::Hits);
        assert_eq!(out.events[1].kind, EventKind::Metadata);
    }

    #[test]
    fn prefixes_without_space_are_accepted() {
        let out = decode("event:progress\ndata:{\"percent\":50}\n\n");
        assert_eq!(out.events[0].kind, EventKind::Progress);
        assert_eq!(out.events[0].json(), Some(&json!({"percent": 50})));
    }

    #[test]
    fn only_one_space_is_stripped() {
        let out = decode("data:  padded\n\n");
        assert_eq!(out.events[0].payload, Payload::Text(" padded".to_string()));
    }

    #[test]
    fn trailing_segment_without_delimiter_is_remainder() {
        let out = decode("data: {\"a\":1}\n\ndata: {\"b\":");
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.remainder, "data: {\"b\":");
    }

    #[test]
    fn complete_looking_tail_is_not_decoded() {
        let out = decode("data: {\"a\":1}");
        assert!(out.events.is_empty());
        assert_eq!(out.remainder, "data: {\"a\":1}");
    }

    #[test]
    fn non_json_untyped_payload_is_forwarded_raw() {
        let out = decode("data: {id:1}\n\ndata: {id:2}\n\ndata: {id:3}\n\n");
        let payloads: Vec<_> = out.events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                Payload::Text("{id:1}".to_string()),
                Payload::Text("{id:2}".to_string()),
                Payload::Text("{id:3}".to_string()),
            ]
        );
        assert!(out.events.iter().all(|e| e.kind == EventKind::Data));
    }

    #[test]
    fn malformed_typed_payload_is_error_classified() {
        let out = decode("event: search_response_hits\ndata: {broken\n\ndata: {\"ok\":true}\n\n");
        assert_eq!(out.events.len(), 2);
        assert!(out.events[0].is_error());
        assert_eq!(out.events[0].kind, EventKind::Hits);
        match &out.events[0].payload {
            Payload::Malformed { diagnostic, raw } => {
                assert!(!diagnostic.is_empty());
                assert_eq!(raw, "{broken");
            }
            other => panic!("expected malformed payload, got {other:?}"),
        }
        assert!(!out.events[1].is_error());
        assert_eq!(out.events[1].json(), Some(&json!({"ok": true})));
    }

    #[test]
    fn unrecognized_segments_are_dropped_and_counted() {
        let out = decode(": keep-alive\n\nid: 7\n\ndata: 1\n\n");
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.dropped, 2);
    }

    #[test]
    fn event_line_without_data_line_is_dropped() {
        let out = decode("event: end\n\n");
        assert!(out.events.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn empty_segments_are_not_counted() {
        let out = decode("\n\n\n\n");
        assert!(out.events.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn decoding_is_split_invariant() {
        let stream = "event: search_response_metadata\ndata: {\"total\":3}\n\n\
                      data: {\"hit\":1}\n\ndata: plain text\n\n\
                      event: search_response_hits\ndata: {oops\n\n: comment\n\n\
                      event: end\ndata: null\n\n";
        let whole = decode(stream).events;

        for split in 0..=stream.len() {
            let mut events = Vec::new();
            let mut buffer = String::new();
            for part in [&stream[..split], &stream[split..]] {
                buffer.push_str(part);
                let out = decode(&buffer);
                events.extend(out.events);
                buffer = out.remainder;
            }
            assert_eq!(events, whole, "split at byte {split}");
        }
    }

    #[test]
    fn encode_then_decode_preserves_structured_payload() {
        let value = json!({"hits": [{"_timestamp": 1, "msg": "a\n\nb"}], "total": 1});
        for kind in [EventKind::Data, EventKind::Hits, EventKind::Other("custom".into())] {
            let event = DecodedEvent::new(kind, Payload::Json(value.clone()));
            let out = decode(&encode(&event));
            assert_eq!(out.events, vec![event]);
            assert_eq!(out.remainder, "");
        }
    }
}
