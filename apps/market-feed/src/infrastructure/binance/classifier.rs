//! Binance Frame Classifier
//!
//! Binance multiplexes several streams onto one socket without a topic
//! envelope, mixes object and array framing, and some payloads (partial
//! depth, spot book ticker) carry no event type at all. Frames are
//! therefore classified by probing in a fixed order:
//!
//! 1. Control responses: `{"result": null, "id": ..}` is an ack,
//!    `{"error": {..}, "id": ..}` a rejection. Neither is routed.
//! 2. Event-type discriminator (`e`) naming a known event.
//! 3. Structural fingerprints, first match wins (see [`BINANCE_RULES`]).
//! 4. An array whose first element carries a discriminator is a batch of
//!    mini tickers.
//!
//! Anything else is [`Classification::Unroutable`].

use serde_json::{Map, Value};

use super::wire::{
    BookTickerEvent, DepthUpdateEvent, ErrorBody, EVENT_BOOK_TICKER, EVENT_DEPTH_UPDATE,
    EVENT_MINI_TICKER, MiniTickerEvent, PartialDepthEvent,
};
use crate::application::ports::{Classification, FrameClassifier, ProtocolError, Route};
use crate::domain::streaming::{ChannelKind, NormalizedRecord};

// =============================================================================
// Rules
// =============================================================================

/// Wire shape a rule decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// `24hrMiniTicker` event.
    MiniTicker,
    /// Book ticker (with or without event type).
    BookTicker,
    /// Symbol-less partial depth snapshot.
    PartialDepth,
    /// `depthUpdate` event.
    DepthUpdate,
}

impl Decoder {
    /// Channel kind produced.
    #[must_use]
    pub const fn kind(self) -> ChannelKind {
        match self {
            Self::MiniTicker => ChannelKind::MiniTicker,
            Self::BookTicker => ChannelKind::BookTicker,
            Self::PartialDepth | Self::DepthUpdate => ChannelKind::Depth,
        }
    }

    fn decode(self, value: Value) -> Result<NormalizedRecord, serde_json::Error> {
        Ok(match self {
            Self::MiniTicker => {
                NormalizedRecord::MiniTicker(serde_json::from_value::<MiniTickerEvent>(value)?.into())
            }
            Self::BookTicker => {
                NormalizedRecord::BookTicker(serde_json::from_value::<BookTickerEvent>(value)?.into())
            }
            Self::PartialDepth => {
                NormalizedRecord::Depth(serde_json::from_value::<PartialDepthEvent>(value)?.into())
            }
            Self::DepthUpdate => {
                NormalizedRecord::Depth(serde_json::from_value::<DepthUpdateEvent>(value)?.into())
            }
        })
    }
}

/// A set of fields that must all be present.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    /// Required field names.
    pub fields: &'static [&'static str],
    /// Decoder for matching frames.
    pub decoder: Decoder,
}

/// Classification rules for one exchange, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierRules {
    /// Name of the event-type field.
    pub discriminator_field: &'static str,
    /// Known discriminator values.
    pub discriminators: &'static [(&'static str, Decoder)],
    /// Structural fingerprints, tried in order.
    pub fingerprints: &'static [Fingerprint],
    /// Decoder for elements of an array batch.
    pub batch: Decoder,
}

impl ClassifierRules {
    fn discriminated(&self, event: &str) -> Option<Decoder> {
        self.discriminators
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, decoder)| *decoder)
    }

    fn fingerprinted(&self, map: &Map<String, Value>) -> Option<Decoder> {
        self.fingerprints
            .iter()
            .find(|fp| fp.fields.iter().all(|f| map.contains_key(*f)))
            .map(|fp| fp.decoder)
    }
}

/// Rules shared by the spot and coin-futures market streams.
pub const BINANCE_RULES: ClassifierRules = ClassifierRules {
    discriminator_field: "e",
    discriminators: &[
        (EVENT_MINI_TICKER, Decoder::MiniTicker),
        (EVENT_BOOK_TICKER, Decoder::BookTicker),
        (EVENT_DEPTH_UPDATE, Decoder::DepthUpdate),
    ],
    fingerprints: &[
        Fingerprint {
            fields: &["lastUpdateId", "bids", "asks"],
            decoder: Decoder::PartialDepth,
        },
        Fingerprint {
            fields: &["b", "B", "a", "A"],
            decoder: Decoder::BookTicker,
        },
    ],
    batch: Decoder::MiniTicker,
};

// =============================================================================
// Classifier
// =============================================================================

/// Rule-driven [`FrameClassifier`] for Binance market streams.
#[derive(Debug, Clone, Copy)]
pub struct BinanceClassifier {
    rules: ClassifierRules,
}

impl Default for BinanceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClassifier {
    /// Classifier with [`BINANCE_RULES`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rules: BINANCE_RULES,
        }
    }

    /// Classifier with custom rules.
    #[must_use]
    pub const fn with_rules(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    fn classify_object(&self, map: Map<String, Value>) -> Classification {
        if let Some(response) = control_response(&map) {
            return response;
        }

        let discriminated = map
            .get(self.rules.discriminator_field)
            .and_then(Value::as_str)
            .and_then(|event| self.rules.discriminated(event));
        if let Some(decoder) = discriminated {
            return routed(decoder, Value::Object(map));
        }

        match self.rules.fingerprinted(&map) {
            Some(decoder) => routed(decoder, Value::Object(map)),
            None => Classification::Unroutable(ProtocolError::UnknownShape),
        }
    }

    fn classify_batch(&self, items: Vec<Value>) -> Classification {
        let is_batch = items
            .first()
            .and_then(Value::as_object)
            .is_some_and(|first| first.contains_key(self.rules.discriminator_field));
        if !is_batch {
            return Classification::Unroutable(ProtocolError::UnknownShape);
        }

        let decoder = self.rules.batch;
        let total = items.len();
        let routes: Vec<Route> = items
            .into_iter()
            .filter_map(|item| match decoder.decode(item) {
                Ok(record) => Some(route(record)),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping undecodable batch element");
                    None
                }
            })
            .collect();

        if routes.is_empty() {
            return Classification::Unroutable(ProtocolError::Decode {
                kind: decoder.kind(),
                reason: format!("none of {total} batch elements decoded"),
            });
        }
        Classification::Routed(routes)
    }
}

impl FrameClassifier for BinanceClassifier {
    fn classify(&self, raw: &str) -> Classification {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => self.classify_object(map),
            Ok(Value::Array(items)) => self.classify_batch(items),
            Ok(_) => Classification::Unroutable(ProtocolError::UnknownShape),
            Err(e) => Classification::Unroutable(ProtocolError::Malformed(e.to_string())),
        }
    }
}

fn route(record: NormalizedRecord) -> Route {
    Route {
        key: record.channel_key(),
        record,
    }
}

fn routed(decoder: Decoder, value: Value) -> Classification {
    match decoder.decode(value) {
        Ok(record) => Classification::Routed(vec![route(record)]),
        Err(e) => Classification::Unroutable(ProtocolError::Decode {
            kind: decoder.kind(),
            reason: e.to_string(),
        }),
    }
}

fn correlation_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn control_response(map: &Map<String, Value>) -> Option<Classification> {
    if let Some(error) = map.get("error") {
        let body: ErrorBody = serde_json::from_value(error.clone()).unwrap_or_else(|_| ErrorBody {
            code: 0,
            msg: error.to_string(),
        });
        return Some(Classification::Rejected {
            id: map.get("id").filter(|id| !id.is_null()).map(correlation_id),
            code: body.code,
            message: body.msg,
        });
    }

    let id = map.get("id")?;
    let empty = match map.get("result")? {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    empty.then(|| Classification::Ack {
        id: correlation_id(id),
    })
}
