//! Binary codec (`bincode`) used for local peers and the shared buffer.
//!
//! `bincode` is not self-describing, so a `serde_json::Value` cannot be read
//! back directly. Envelopes go through a mirror struct whose payload is a
//! tagged `WireValue` tree instead.

use std::fmt;

use bytes::Bytes;
use serde::de::{self, DeserializeSeed, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::protocol::{Action, Codec, CodecKind, Envelope, MessageType, Status};

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Encode a bare value (shared buffer contents).
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        bincode::serialize(&WireValue::from(value))
            .map_err(|e| BrokerError::Encode(format!("bincode encode failed: {e}")))
    }

    /// Decode a bare value written by `encode_value`.
    pub fn decode_value(&self, buf: &[u8]) -> Result<Value> {
        let wire: WireValue = bincode::deserialize(buf)
            .map_err(|e| BrokerError::Decode(format!("invalid binary value: {e}")))?;
        Ok(wire.into())
    }
}

impl Codec for BinaryCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Binary
    }

    fn encode(&self, env: &Envelope) -> Result<Bytes> {
        let wire = BinaryEnvelope {
            action: String::from(env.action.clone()),
            channel: env.channel.clone(),
            message_type: env.message_type,
            message_id: env.message_id,
            timestamp: env.timestamp.clone(),
            status: env.status,
            payload: WireValue::from(&env.payload),
        };
        bincode::serialize(&wire)
            .map(Bytes::from)
            .map_err(|e| BrokerError::Encode(format!("bincode encode failed: {e}")))
    }

    fn decode(&self, buf: &[u8]) -> Result<Envelope> {
        let wire: BinaryEnvelope = bincode::deserialize(buf)
            .map_err(|e| BrokerError::Decode(format!("invalid binary envelope: {e}")))?;
        Ok(Envelope {
            action: Action::from(wire.action),
            channel: wire.channel,
            message_type: wire.message_type,
            message_id: wire.message_id,
            timestamp: wire.timestamp,
            status: wire.status,
            payload: wire.payload.into(),
        })
    }
}

/// Field-for-field mirror of `Envelope` with a bincode-safe payload.
#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    action: String,
    channel: Option<String>,
    message_type: MessageType,
    message_id: Option<Uuid>,
    timestamp: Option<String>,
    status: Status,
    payload: WireValue,
}

/// Deepest array/object nesting accepted from the wire. Matches the JSON
/// decoder's limit so both codecs accept the same values.
pub const MAX_VALUE_DEPTH: usize = 128;

/// Self-describing value tree.
///
/// Serialized with the derived layout; deserialized by hand so nesting depth
/// is bounded before the decoder recurses.
#[derive(Debug, Clone, PartialEq, Serialize)]
enum WireValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Array(Vec<WireValue>),
    Object(Vec<(String, WireValue)>),
}

impl From<&Value> for WireValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::I64(i)
                } else if let Some(u) = n.as_u64() {
                    WireValue::U64(u)
                } else {
                    n.as_f64().map(WireValue::F64).unwrap_or(WireValue::Null)
                }
            }
            Value::String(s) => WireValue::String(s.clone()),
            Value::Array(items) => WireValue::Array(items.iter().map(WireValue::from).collect()),
            Value::Object(map) => WireValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), WireValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<WireValue> for Value {
    fn from(w: WireValue) -> Self {
        match w {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::I64(i) => Value::Number(i.into()),
            WireValue::U64(u) => Value::Number(u.into()),
            // non-finite floats have no JSON form
            WireValue::F64(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            WireValue::String(s) => Value::String(s),
            WireValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            WireValue::Object(entries) => {
                Value::Object(entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect::<Map<_, _>>())
            }
        }
    }
}

const VARIANTS: &[&str] = &["Null", "Bool", "I64", "U64", "F64", "String", "Array", "Object"];

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        ValueSeed { depth: 0 }.deserialize(d)
    }
}

/// One `WireValue` at `depth` containers below the root.
#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = WireValue;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<WireValue, D::Error> {
        if self.depth > MAX_VALUE_DEPTH {
            return Err(de::Error::custom(format!(
                "value nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        d.deserialize_enum("WireValue", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = WireValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a wire value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> std::result::Result<WireValue, A::Error> {
        let (tag, variant): (u32, _) = data.variant()?;
        let inner = ValueSeed {
            depth: self.depth + 1,
        };
        match tag {
            0 => variant.unit_variant().map(|()| WireValue::Null),
            1 => variant.newtype_variant().map(WireValue::Bool),
            2 => variant.newtype_variant().map(WireValue::I64),
            3 => variant.newtype_variant().map(WireValue::U64),
            4 => variant.newtype_variant().map(WireValue::F64),
            5 => variant.newtype_variant().map(WireValue::String),
            6 => variant.newtype_variant_seed(ItemsSeed(inner)).map(WireValue::Array),
            7 => variant.newtype_variant_seed(EntriesSeed(inner)).map(WireValue::Object),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Unsigned(u64::from(other)),
                &"a wire value tag 0..=7",
            )),
        }
    }
}

/// Array elements, each decoded with the inner seed.
struct ItemsSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for ItemsSeed {
    type Value = Vec<WireValue>;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Self::Value, D::Error> {
        d.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ItemsSeed {
    type Value = Vec<WireValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of wire values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        // the length prefix is untrusted
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Object entries as `(key, value)` pairs.
struct EntriesSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for EntriesSeed {
    type Value = Vec<(String, WireValue)>;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Self::Value, D::Error> {
        d.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for EntriesSeed {
    type Value = Vec<(String, WireValue)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of object entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(entry) = seq.next_element_seed(EntrySeed(self.0))? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

struct EntrySeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for EntrySeed {
    type Value = (String, WireValue);

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Self::Value, D::Error> {
        d.deserialize_tuple(2, self)
    }
}

impl<'de> Visitor<'de> for EntrySeed {
    type Value = (String, WireValue);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a (key, value) pair")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let key: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let value = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok((key, value))
    }
}
