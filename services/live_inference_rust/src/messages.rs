//! Stream entry decoding and output payload encoding.
//!
//! Input entries carry flat string fields; nested payloads (`data`,
//! `values`) are JSON strings. Outputs follow the same convention.

use chrono::Utc;
use live_edge_core::event_log::LogRecord;
use live_edge_core::market_intel::ShadingResult;
use live_edge_core::models::{
    ExecutionReport, FixtureId, MarketQuote, MatchEvent, MatchEventKind, OddsUpdate, Probabilities, Signal,
};
use live_edge_core::sharp_money::LeadershipResult;
use serde::Serialize;
use thiserror::Error;

/// A stream entry that can never be processed, however often it is retried.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not valid JSON: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("field '{field}' has invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("entry from unexpected stream '{0}'")]
    UnknownStream(String),
}

fn required<'a>(record: &'a LogRecord, field: &'static str) -> Result<&'a str, MessageError> {
    match record.field(field) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(MessageError::MissingField(field)),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, field: &'static str) -> Result<T, MessageError> {
    serde_json::from_str(raw).map_err(|source| MessageError::InvalidJson { field, source })
}

/// Epoch milliseconds; whole or fractional values are accepted.
fn parse_timestamp_ms(raw: &str) -> Result<i64, MessageError> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    match raw.parse::<f64>() {
        Ok(ms) if ms.is_finite() => Ok(ms as i64),
        _ => Err(MessageError::InvalidValue {
            field: "timestamp",
            value: raw.to_string(),
        }),
    }
}

pub fn decode_event(record: &LogRecord) -> Result<(FixtureId, MatchEvent), MessageError> {
    let fixture_id = required(record, "fixtureId")?.to_string();
    let kind = MatchEventKind::parse(required(record, "type")?);
    let data: serde_json::Value = match record.field("data") {
        Some(raw) if !raw.trim().is_empty() => parse_json(raw, "data")?,
        _ => serde_json::Value::Object(Default::default()),
    };

    let elapsed = match record.field("elapsed") {
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| MessageError::InvalidValue {
            field: "elapsed",
            value: raw.to_string(),
        })?),
        None => data.get("elapsed").and_then(|v| v.as_f64()),
    };

    Ok((fixture_id, MatchEvent { kind, elapsed, data }))
}

pub fn decode_odds(record: &LogRecord) -> Result<(FixtureId, OddsUpdate), MessageError> {
    let fixture_id = required(record, "fixtureId")?.to_string();
    let bookmaker = required(record, "bookmaker")?.to_string();
    let values: Vec<MarketQuote> = parse_json(required(record, "values")?, "values")?;
    let timestamp_ms = match record.field("timestamp") {
        Some(raw) => parse_timestamp_ms(raw)?,
        None => Utc::now().timestamp_millis(),
    };

    Ok((
        fixture_id,
        OddsUpdate {
            bookmaker,
            market: record.field("market").map(str::to_string),
            values,
            timestamp_ms,
        },
    ))
}

fn now_secs() -> String {
    format!("{:.3}", Utc::now().timestamp_millis() as f64 / 1000.0)
}

pub fn prediction_fields(fixture_id: &str, probs: &Probabilities) -> serde_json::Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("fixtureId", fixture_id.to_string()),
        ("probs", serde_json::to_string(probs)?),
        ("timestamp", now_secs()),
    ])
}

pub fn signal_fields(signal: &Signal, execution: &ExecutionReport) -> serde_json::Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("fixtureId", signal.fixture_id.clone()),
        ("signal", serde_json::to_string(signal)?),
        ("execution", serde_json::to_string(execution)?),
        ("timestamp", now_secs()),
    ])
}

/// A shaded or stale soft-book quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAlert {
    pub bookmaker: String,
    pub selection: String,
    pub odds: f64,
    #[serde(flatten)]
    pub shading: ShadingResult,
    pub stale_line_probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharp_bookmaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leadership: Option<LeadershipResult>,
}

pub fn alert_fields(fixture_id: &str, alert: &MarketAlert) -> serde_json::Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("fixtureId", fixture_id.to_string()),
        ("alert", serde_json::to_string(alert)?),
        ("timestamp", now_secs()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(stream: &str, fields: &[(&str, &str)]) -> LogRecord {
        LogRecord {
            stream: stream.to_string(),
            id: "1-0".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_decode_goal_event() {
        let rec = record(
            "live_events",
            &[
                ("fixtureId", "123"),
                ("type", "GOAL"),
                ("data", r#"{"score":[1,0],"elapsed":31,"homeTeam":"Lyon"}"#),
            ],
        );
        let (fixture, event) = decode_event(&rec).unwrap();
        assert_eq!(fixture, "123");
        assert_eq!(event.kind, MatchEventKind::Goal);
        assert_eq!(event.elapsed, Some(31.0));
        assert_eq!(event.score(), Some((1, 0)));
    }

    #[test]
    fn test_top_level_elapsed_wins() {
        let rec = record(
            "live_events",
            &[("fixtureId", "1"), ("type", "SHOT"), ("elapsed", "44.5"), ("data", r#"{"elapsed":12}"#)],
        );
        let (_, event) = decode_event(&rec).unwrap();
        assert_eq!(event.elapsed, Some(44.5));
    }

    #[test]
    fn test_decode_event_errors() {
        let missing = record("live_events", &[("type", "GOAL")]);
        assert!(matches!(decode_event(&missing), Err(MessageError::MissingField("fixtureId"))));

        let bad_json = record("live_events", &[("fixtureId", "1"), ("type", "GOAL"), ("data", "{oops")]);
        assert!(matches!(
            decode_event(&bad_json),
            Err(MessageError::InvalidJson { field: "data", .. })
        ));
    }

    #[test]
    fn test_decode_odds_with_depth() {
        let rec = record(
            "live_odds",
            &[
                ("fixtureId", "9"),
                ("bookmaker", "Bet365"),
                ("values", r#"[{"selection":"Home","odds":2.1,"depth":[{"price":2.1,"volume":50}]},{"value":"Away","odds":3.4}]"#),
                ("timestamp", "1700000000000"),
            ],
        );
        let (fixture, update) = decode_odds(&rec).unwrap();
        assert_eq!(fixture, "9");
        assert_eq!(update.bookmaker, "Bet365");
        assert_eq!(update.timestamp_ms, 1_700_000_000_000);
        assert_eq!(update.values.len(), 2);
        assert_eq!(update.values[0].depth.as_ref().unwrap()[0].volume, 50.0);
        assert_eq!(update.values[1].selection, "Away");
    }

    #[test]
    fn test_decode_odds_rejects_bad_timestamp() {
        let rec = record(
            "live_odds",
            &[("fixtureId", "9"), ("bookmaker", "Bet365"), ("values", "[]"), ("timestamp", "soon")],
        );
        assert!(matches!(
            decode_odds(&rec),
            Err(MessageError::InvalidValue { field: "timestamp", .. })
        ));
    }

    #[test]
    fn test_signal_payload_shape() {
        let signal = Signal {
            fixture_id: "7".to_string(),
            selection: "Home".to_string(),
            ev: 0.1,
            prob: 0.5,
            odds: 2.2,
            bookmaker: Some("Bet365".to_string()),
        };
        let execution = ExecutionReport {
            fixture_id: "7".to_string(),
            selection: "Home".to_string(),
            original_odds: 2.2,
            executed_odds: 2.15,
            status: live_edge_core::models::ExecutionStatus::Executed,
            delay: 5.5,
            filled_stake: 100.0,
            requested_stake: 100.0,
        };
        let fields: HashMap<_, _> = signal_fields(&signal, &execution).unwrap().into_iter().collect();
        assert_eq!(fields["fixtureId"], "7");

        let signal_json: serde_json::Value = serde_json::from_str(&fields["signal"]).unwrap();
        assert_eq!(signal_json["selection"], "Home");
        assert!(signal_json.get("fixture_id").is_none());

        let exec_json: serde_json::Value = serde_json::from_str(&fields["execution"]).unwrap();
        assert_eq!(exec_json["status"], "EXECUTED");
        assert_eq!(exec_json["executedOdds"], 2.15);
    }
}
