//! Record parsing for the line-oriented producer protocol.
//!
//! A line is split on whitespace and classified by field count:
//! one field is a node announcement, two fields are an
//! `ORIGIN_TIMESTAMP PAYLOAD` event, anything else is ignored.
//!
//! An event whose timestamp does not parse still counts its payload bytes
//! but records no latency sample, so the delay log has no entry for it.

use std::num::ParseFloatError;

use thiserror::Error;

use crate::sink::aggregated::Contribution;

/// Errors that can occur while parsing an event's origin timestamp.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid origin timestamp {raw:?}: {source}")]
    InvalidTimestamp {
        raw: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("origin timestamp {raw:?} is not finite")]
    NonFiniteTimestamp { raw: String },
}

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// First contact from a producer.
    Connect { node: &'a str },
    /// A timestamped event.
    Event {
        raw_origin: &'a str,
        origin: Result<f64, ParseError>,
        payload: &'a str,
    },
    /// A line with an unsupported field count.
    Ignored { fields: usize },
}

impl Record<'_> {
    /// Returns what this record adds to the current interval.
    ///
    /// Events with an unparseable origin still count their payload bytes but
    /// contribute no delay sample.
    pub fn contribution(&self, now: f64) -> Option<Contribution> {
        match self {
            Record::Connect { node } => Some(Contribution::bytes(node.len() as u64)),
            Record::Event {
                origin: Ok(origin),
                payload,
                ..
            } => Some(Contribution::with_latency(
                payload.len() as u64,
                now - origin,
            )),
            Record::Event {
                origin: Err(_),
                payload,
                ..
            } => Some(Contribution::bytes(payload.len() as u64)),
            Record::Ignored { .. } => None,
        }
    }
}

/// Parse one line (with or without its trailing newline) into a [`Record`].
pub fn parse_record(line: &str) -> Record<'_> {
    let mut fields = line.split_whitespace();
    let first = fields.next();
    let second = fields.next();
    let rest = fields.count();

    match (first, second, rest) {
        (None, _, _) => Record::Ignored { fields: 0 },
        (Some(node), None, _) => Record::Connect { node },
        (Some(raw_origin), Some(payload), 0) => Record::Event {
            raw_origin,
            origin: parse_origin(raw_origin),
            payload,
        },
        (Some(_), Some(_), rest) => Record::Ignored { fields: 2 + rest },
    }
}

/// Parse an origin timestamp in float Unix-epoch seconds.
pub fn parse_origin(raw: &str) -> Result<f64, ParseError> {
    let value = raw
        .parse::<f64>()
        .map_err(|source| ParseError::InvalidTimestamp {
            raw: raw.to_string(),
            source,
        })?;

    if !value.is_finite() {
        return Err(ParseError::NonFiniteTimestamp {
            raw: raw.to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        assert_eq!(parse_record("alice\n"), Record::Connect { node: "alice" });
        assert_eq!(parse_record("  bob \r\n"), Record::Connect { node: "bob" });
    }

    #[test]
    fn test_parse_event() {
        let record = parse_record("1000.5 hello\n");
        assert_eq!(
            record,
            Record::Event {
                raw_origin: "1000.5",
                origin: Ok(1000.5),
                payload: "hello",
            }
        );
    }

    #[test]
    fn test_parse_event_tab_separated() {
        let record = parse_record("12\tpayload");
        assert!(matches!(
            record,
            Record::Event {
                origin: Ok(o),
                payload: "payload",
                ..
            } if o == 12.0
        ));
    }

    #[test]
    fn test_parse_event_bad_timestamp() {
        let Record::Event {
            raw_origin,
            origin,
            payload,
        } = parse_record("notanumber hello\n")
        else {
            panic!("expected event record");
        };
        assert_eq!(raw_origin, "notanumber");
        assert_eq!(payload, "hello");

        let err = origin.unwrap_err();
        assert!(matches!(err, ParseError::InvalidTimestamp { .. }));
        assert!(err.to_string().contains("notanumber"));
    }

    #[test]
    fn test_parse_event_non_finite_timestamp() {
        assert!(matches!(
            parse_origin("NaN"),
            Err(ParseError::NonFiniteTimestamp { .. })
        ));
        assert!(matches!(
            parse_origin("inf"),
            Err(ParseError::NonFiniteTimestamp { .. })
        ));
    }

    #[test]
    fn test_parse_ignored_field_counts() {
        assert_eq!(parse_record("\n"), Record::Ignored { fields: 0 });
        assert_eq!(parse_record("   "), Record::Ignored { fields: 0 });
        assert_eq!(parse_record("a b c"), Record::Ignored { fields: 3 });
        assert_eq!(parse_record("a b c d e"), Record::Ignored { fields: 5 });
    }

    #[test]
    fn test_contribution_connect_counts_node_bytes() {
        let c = parse_record("alice").contribution(2000.0);
        assert_eq!(c, Some(Contribution::bytes(5)));
    }

    #[test]
    fn test_contribution_event_latency() {
        let c = parse_record("1000.0 hello")
            .contribution(1003.5)
            .expect("event contributes");
        assert_eq!(c.bytes, 5);
        assert_eq!(c.latency, Some(3.5));
    }

    #[test]
    fn test_contribution_event_negative_latency_kept() {
        let c = parse_record("1010.0 x")
            .contribution(1000.0)
            .expect("event contributes");
        assert_eq!(c.latency, Some(-10.0));
    }

    #[test]
    fn test_contribution_bad_timestamp_counts_bytes_only() {
        let c = parse_record("notanumber hello").contribution(1000.0);
        assert_eq!(c, Some(Contribution::bytes(5)));
    }

    #[test]
    fn test_contribution_non_finite_timestamp_has_no_latency() {
        let c = parse_record("NaN hello").contribution(1000.0).expect("event");
        assert_eq!(c.bytes, 5);
        assert_eq!(c.latency, None);
    }

    #[test]
    fn test_contribution_ignored_is_none() {
        assert_eq!(parse_record("a b c").contribution(1000.0), None);
    }

    #[test]
    fn test_contribution_counts_utf8_bytes() {
        let c = parse_record("1.0 héllo").contribution(2.0).expect("event");
        assert_eq!(c.bytes, 6);
    }
}
