//! Score record projection and ranking

use crate::codec::TaggedValue;
use crate::{Result, RuntimeError};
use serde::{Deserialize, Serialize};

/// One participant's score as returned by the leaderboard script
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub participant: String,
    pub score: f64,
}

/// A ranked leaderboard row, in its wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: u32,
    #[serde(rename = "name")]
    pub participant: String,
    pub score: f64,
    /// `None` is terminal: the lookup failed or found nothing
    #[serde(rename = "cheatFlag")]
    pub trust_flag: Option<u8>,
}

/// Project an `Array` of `Struct`s into score records.
///
/// Field 0 is the participant, field 1 the decimal score. Any malformed
/// element fails the whole call.
pub fn parse_records(value: &TaggedValue) -> Result<Vec<ScoreRecord>> {
    let items = value.as_array().ok_or_else(|| {
        RuntimeError::decode(
            format!("expected Array, got {}", value.type_name()),
            raw(value),
        )
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_record(item).map_err(|reason| {
            RuntimeError::decode(format!("record {index}: {reason}"), raw(item))
        }))
        .collect()
}

fn parse_record(item: &TaggedValue) -> std::result::Result<ScoreRecord, String> {
    let composite = item
        .as_struct()
        .ok_or_else(|| format!("expected Struct, got {}", item.type_name()))?;

    let participant = match composite.fields.first().map(|f| &f.value) {
        Some(TaggedValue::String(s) | TaggedValue::Address(s)) => s.clone(),
        Some(other) => return Err(format!("participant has type {}", other.type_name())),
        None => return Err("missing participant field".to_string()),
    };

    let score_text = composite
        .fields
        .get(1)
        .ok_or("missing score field")?
        .value
        .as_text()
        .ok_or("score is not a decimal")?;
    let score: f64 = score_text
        .trim()
        .parse()
        .map_err(|_| format!("non-numeric score {score_text:?}"))?;
    if !score.is_finite() {
        return Err(format!("non-finite score {score_text:?}"));
    }

    Ok(ScoreRecord { participant, score })
}

fn raw(value: &TaggedValue) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Sort descending by score and assign `rank = position + 1`.
///
/// Equal scores keep their input order.
pub fn rank(mut records: Vec<ScoreRecord>) -> Vec<RankedEntry> {
    records.sort_by(|a, b| b.score.total_cmp(&a.score));

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| RankedEntry {
            rank: index as u32 + 1,
            participant: record.participant,
            score: record.score,
            trust_flag: None,
        })
        .collect()
}
