//! Conversion between the JSON values the admin API speaks and the CBOR
//! values stored in agent cells.

use ciborium::value::Value as Cbor;
use serde_json::Value as Json;

/// Convert a JSON value into its CBOR counterpart. Lossless for everything
/// JSON can express.
pub fn json_to_cbor(value: &Json) -> Cbor {
    match value {
        Json::Null => Cbor::Null,
        Json::Bool(b) => Cbor::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Cbor::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Cbor::Integer(u.into())
            } else {
                Cbor::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Cbor::Text(s.clone()),
        Json::Array(items) => Cbor::Array(items.iter().map(json_to_cbor).collect()),
        Json::Object(map) => Cbor::Map(
            map.iter()
                .map(|(k, v)| (Cbor::Text(k.clone()), json_to_cbor(v)))
                .collect(),
        ),
    }
}

/// Convert a CBOR value into JSON. CBOR-only shapes degrade: byte strings
/// become hex text, non-text map keys are stringified, tags are unwrapped.
pub fn cbor_to_json(value: &Cbor) -> Json {
    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(*b),
        Cbor::Integer(i) => {
            let i: i128 = (*i).into();
            serde_json::Number::from_i128(i).map(Json::Number).unwrap_or(Json::Null)
        }
        Cbor::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Cbor::Text(s) => Json::String(s.clone()),
        Cbor::Bytes(b) => Json::String(hex::encode(b)),
        Cbor::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Cbor::Text(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        Cbor::Tag(_, inner) => cbor_to_json(inner),
        _ => Json::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trips_through_cbor() {
        let original = json!({
            "name": "agent-7",
            "level": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": { "on": true, "off": null },
        });

        let there = json_to_cbor(&original);
        let back = cbor_to_json(&there);
        assert_eq!(original, back);
    }

    #[test]
    fn cbor_bytes_degrade_to_hex() {
        let value = Cbor::Bytes(vec![0xde, 0xad]);
        assert_eq!(cbor_to_json(&value), json!("dead"));
    }

    #[test]
    fn large_integers_survive() {
        let original = json!(u64::MAX);
        assert_eq!(cbor_to_json(&json_to_cbor(&original)), original);
    }
}
