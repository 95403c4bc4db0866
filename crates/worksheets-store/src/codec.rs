//! Encoding and decoding of stored value strings.
//!
//! Wire forms:
//!   - `Undefined`        → SQL NULL
//!   - text               → the characters verbatim
//!   - bool               → `true` / `false`
//!   - number             → decimal with the scale's fractional digits
//!   - slice reference    → `[:<lastRank>:<sliceId>`
//!   - worksheet ref      → `*:<wsId>@<version>`; old records may omit the
//!     `@<version>` suffix, which decodes as version −1 ("unknown") and
//!     forces the next write to upgrade the record.
//!
//! Decoding is driven by the declared field type; refs and slices come back
//! as indirections the loader resolves against the store.

use uuid::Uuid;
use worksheets_common::{Number, Type, Value};
use worksheets_eval::WorksheetGraph;

use crate::error::StoreError;

/// A decoded value string. Scalars are complete; refs and slices need
/// further loading.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Scalar(Value),
    SliceRef { id: Uuid, last_rank: i64 },
    WsRef { id: Uuid, version: i64 },
}

/// Encode a live value. Worksheet refs capture the referenced worksheet's
/// current version.
pub fn encode(graph: &WorksheetGraph, value: &Value) -> Option<String> {
    match value {
        Value::Undefined => None,
        Value::Text(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Slice(s) => Some(format!("[:{}:{}", s.last_rank, s.id)),
        Value::Worksheet(ws) => Some(format!("*:{}@{}", graph.uuid(*ws), graph.version(*ws))),
        Value::WsRefAtVersion { ws, version } => {
            if *version < 0 {
                Some(format!("*:{}", graph.uuid(*ws)))
            } else {
                Some(format!("*:{}@{}", graph.uuid(*ws), version))
            }
        }
    }
}

fn corrupt(ty: &Type, raw: &str) -> StoreError {
    StoreError::CorruptRecord(format!("{raw:?} does not decode as {ty}"))
}

/// Decode a stored string against the declared type.
pub fn decode(ty: &Type, raw: Option<&str>) -> Result<Decoded, StoreError> {
    let Some(raw) = raw else {
        return Ok(Decoded::Scalar(Value::Undefined));
    };
    match ty {
        Type::Text => Ok(Decoded::Scalar(Value::Text(raw.to_string()))),
        Type::Bool => match raw {
            "true" => Ok(Decoded::Scalar(Value::Bool(true))),
            "false" => Ok(Decoded::Scalar(Value::Bool(false))),
            _ => Err(corrupt(ty, raw)),
        },
        Type::Number(scale) => {
            let number = Number::parse(raw).map_err(|_| corrupt(ty, raw))?;
            let number = number.rescale(*scale).map_err(|_| corrupt(ty, raw))?;
            Ok(Decoded::Scalar(Value::Number(number)))
        }
        Type::Slice(_) => decode_slice_ref(ty, raw),
        Type::Ref(_) => decode_ws_ref(ty, raw),
        Type::Undefined | Type::Date | Type::Time => Err(corrupt(ty, raw)),
    }
}

fn decode_slice_ref(ty: &Type, raw: &str) -> Result<Decoded, StoreError> {
    let rest = raw.strip_prefix("[:").ok_or_else(|| corrupt(ty, raw))?;
    let (last_rank, id) = rest.split_once(':').ok_or_else(|| corrupt(ty, raw))?;
    let last_rank: i64 = last_rank.parse().map_err(|_| corrupt(ty, raw))?;
    let id = Uuid::parse_str(id).map_err(|_| corrupt(ty, raw))?;
    Ok(Decoded::SliceRef { id, last_rank })
}

fn decode_ws_ref(ty: &Type, raw: &str) -> Result<Decoded, StoreError> {
    let rest = raw.strip_prefix("*:").ok_or_else(|| corrupt(ty, raw))?;
    let (id, version) = match rest.split_once('@') {
        Some((id, version)) => {
            let version: i64 = version.parse().map_err(|_| corrupt(ty, raw))?;
            (id, version)
        }
        None => (rest, -1),
    };
    let id = Uuid::parse_str(id).map_err(|_| corrupt(ty, raw))?;
    Ok(Decoded::WsRef { id, version })
}
