//! Transport frame decoding.
//!
//! The transport sends three shapes, sometimes batched in a top-level
//! array:
//! - `{"price_changes": [{asset_id, price, size, side}, ...]}`
//! - `{"asset_id": ..., "bids": [...], "asks": [...]}` full snapshots
//! - `{"event_type": "price_change" | "book", ...}` typed frames
//!
//! Literal `PING`/`PONG` text updates the heartbeat only and decodes to
//! nothing. Unknown event types are tolerated and dropped; malformed
//! JSON or missing fields are decode errors the service counts and
//! drops.

use crate::error::{FeedError, FeedResult};
use mercury_core::{Price, Size, TokenId};
use serde_json::Value;

/// Which side of the book a price change touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// A decoded book mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum BookFrame {
    /// One level changed on one side.
    PriceChange {
        token_id: TokenId,
        side: BookSide,
        price: Price,
        size: Size,
    },
    /// Full replacement of both ladders.
    Snapshot {
        token_id: TokenId,
        bids: Vec<(Price, Size)>,
        asks: Vec<(Price, Size)>,
    },
}

impl BookFrame {
    pub fn token_id(&self) -> &TokenId {
        match self {
            Self::PriceChange { token_id, .. } => token_id,
            Self::Snapshot { token_id, .. } => token_id,
        }
    }
}

/// Decode one text frame into zero or more book mutations.
pub fn decode_frames(text: &str) -> FeedResult<Vec<BookFrame>> {
    let trimmed = text.trim();
    if trimmed == "PING" || trimmed == "PONG" {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| FeedError::Decode(e.to_string()))?;

    match value {
        // A top-level array is a batch.
        Value::Array(items) => {
            let mut frames = Vec::new();
            for item in items {
                frames.extend(decode_value(&item)?);
            }
            Ok(frames)
        }
        Value::Object(_) => decode_value(&value),
        other => Err(FeedError::Decode(format!(
            "unexpected frame shape: {other}"
        ))),
    }
}

fn decode_value(value: &Value) -> FeedResult<Vec<BookFrame>> {
    if let Some(changes) = value.get("price_changes").and_then(Value::as_array) {
        let mut frames = Vec::with_capacity(changes.len());
        for change in changes {
            frames.push(decode_price_change(change)?);
        }
        return Ok(frames);
    }

    if value.get("bids").is_some() && value.get("asks").is_some() {
        return Ok(vec![decode_snapshot(value)?]);
    }

    match value.get("event_type").and_then(Value::as_str) {
        Some("price_change") => Ok(vec![decode_price_change(value)?]),
        Some("book") => Ok(vec![decode_snapshot(value)?]),
        // tick_size_change and friends carry no book data.
        Some(_) => Ok(Vec::new()),
        None => Err(FeedError::Decode("unrecognized frame".to_string())),
    }
}

fn token_of(value: &Value) -> FeedResult<TokenId> {
    value
        .get("asset_id")
        .or_else(|| value.get("token_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(TokenId::from)
        .ok_or_else(|| FeedError::Decode("missing asset_id".to_string()))
}

fn decimal_field(value: &Value, field: &str) -> FeedResult<rust_decimal::Decimal> {
    let raw = value
        .get(field)
        .ok_or_else(|| FeedError::Decode(format!("missing {field}")))?;
    let parsed = match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FeedError::Decode(format!("bad {field}: {raw}")))
}

fn decode_price_change(value: &Value) -> FeedResult<BookFrame> {
    let token_id = token_of(value)?;
    let price = Price::new(decimal_field(value, "price")?);
    let size = Size::new(decimal_field(value, "size")?);
    let side = match value.get("side").and_then(Value::as_str) {
        Some("bid") | Some("BUY") => BookSide::Bid,
        Some("ask") | Some("SELL") => BookSide::Ask,
        other => {
            return Err(FeedError::Decode(format!("bad side: {other:?}")));
        }
    };
    Ok(BookFrame::PriceChange {
        token_id,
        side,
        price,
        size,
    })
}

fn decode_levels(value: &Value, field: &str) -> FeedResult<Vec<(Price, Size)>> {
    let levels = value
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| FeedError::Decode(format!("missing {field}")))?;
    levels
        .iter()
        .map(|level| {
            Ok((
                Price::new(decimal_field(level, "price")?),
                Size::new(decimal_field(level, "size")?),
            ))
        })
        .collect()
}

fn decode_snapshot(value: &Value) -> FeedResult<BookFrame> {
    Ok(BookFrame::Snapshot {
        token_id: token_of(value)?,
        bids: decode_levels(value, "bids")?,
        asks: decode_levels(value, "asks")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ping_pong_decode_to_nothing() {
        assert!(decode_frames("PING").unwrap().is_empty());
        assert!(decode_frames("PONG").unwrap().is_empty());
    }

    #[test]
    fn test_price_changes_list() {
        let text = r#"{
            "market": "0xcond",
            "price_changes": [
                {"asset_id": "tok-1", "price": "0.48", "size": "100", "side": "ask"},
                {"asset_id": "tok-1", "price": "0.45", "size": "50", "side": "bid"}
            ]
        }"#;
        let frames = decode_frames(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            BookFrame::PriceChange {
                token_id: TokenId::from("tok-1"),
                side: BookSide::Ask,
                price: Price::new(dec!(0.48)),
                size: Size::new(dec!(100)),
            }
        );
    }

    #[test]
    fn test_full_snapshot() {
        let text = r#"{
            "asset_id": "tok-1",
            "bids": [{"price": "0.45", "size": "10"}],
            "asks": [{"price": "0.48", "size": "20"}, {"price": "0.49", "size": "30"}]
        }"#;
        let frames = decode_frames(text).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            BookFrame::Snapshot { token_id, bids, asks } => {
                assert_eq!(token_id, &TokenId::from("tok-1"));
                assert_eq!(bids.len(), 1);
                assert_eq!(asks.len(), 2);
                assert_eq!(asks[1].0, Price::new(dec!(0.49)));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_event_type_frames() {
        let text = r#"{
            "event_type": "price_change",
            "token_id": "tok-2",
            "price": "0.50",
            "size": "0",
            "side": "ask"
        }"#;
        let frames = decode_frames(text).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].token_id(), &TokenId::from("tok-2"));

        let book = r#"{
            "event_type": "book",
            "asset_id": "tok-2",
            "bids": [],
            "asks": []
        }"#;
        assert_eq!(decode_frames(book).unwrap().len(), 1);
    }

    #[test]
    fn test_top_level_array_is_batch() {
        let text = r#"[
            {"asset_id": "a", "bids": [], "asks": []},
            {"price_changes": [{"asset_id": "b", "price": "0.1", "size": "5", "side": "bid"}]}
        ]"#;
        let frames = decode_frames(text).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_unknown_event_type_dropped() {
        let text = r#"{"event_type": "tick_size_change", "asset_id": "a"}"#;
        assert!(decode_frames(text).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frames_error() {
        assert!(decode_frames("not json").is_err());
        assert!(decode_frames(r#"{"hello": "world"}"#).is_err());
        assert!(decode_frames(r#"{"price_changes": [{"price": "0.5"}]}"#).is_err());
        assert!(decode_frames(
            r#"{"asset_id": "a", "price": "x", "size": "1", "side": "bid", "event_type": "price_change"}"#
        )
        .is_err());
        assert!(decode_frames("42").is_err());
    }

    #[test]
    fn test_numeric_price_accepted() {
        let text = r#"{"price_changes": [{"asset_id": "a", "price": 0.48, "size": 100, "side": "ask"}]}"#;
        let frames = decode_frames(text).unwrap();
        match &frames[0] {
            BookFrame::PriceChange { price, size, .. } => {
                assert_eq!(*price, Price::new(dec!(0.48)));
                assert_eq!(*size, Size::new(dec!(100)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
