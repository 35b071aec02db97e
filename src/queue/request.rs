use crate::error::RequestError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::VariantNames;

/// Scoring dimension of a content item.
///
/// The strum name is the canonical property name, used both to look values
/// up on the page and as the key in the upload payload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
    strum::VariantNames,
)]
#[serde(into = "&'static str", try_from = "String")]
pub enum ScoreType {
    #[strum(serialize = "scoreUnaware")]
    Unaware,
    #[strum(serialize = "scoreCurious")]
    Curious,
    #[strum(serialize = "scoreFollower")]
    Follower,
    #[strum(serialize = "scoreGuide")]
    Guide,
    #[strum(serialize = "scoreConfidence")]
    Confidence,
}

impl ScoreType {
    /// The four audience scores; confidence travels separately.
    pub const AUDIENCE: [Self; 4] = [Self::Unaware, Self::Curious, Self::Follower, Self::Guide];

    pub fn property_name(self) -> &'static str {
        self.into()
    }
}

impl TryFrom<String> for ScoreType {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse().map_err(|_| {
            format!(
                "unknown score property `{name}`, expected one of {:?}",
                Self::VARIANTS
            )
        })
    }
}

/// One content item's score update.
///
/// Immutable once built; every constructor validates, so anything holding a
/// `ScoreUpdateRequest` can assume a non-empty id, finite scores and a
/// confidence inside `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawScoreUpdate")]
pub struct ScoreUpdateRequest {
    content_id: String,
    scores: BTreeMap<ScoreType, f64>,
    confidence: f64,
    #[serde(skip)]
    encoded_len: usize,
}

impl ScoreUpdateRequest {
    pub fn new(
        content_id: impl Into<String>,
        scores: BTreeMap<ScoreType, f64>,
        confidence: f64,
    ) -> Result<Self, RequestError> {
        let content_id = content_id.into();
        if content_id.trim().is_empty() {
            return Err(RequestError::EmptyContentId);
        }
        if let Some((score_type, _)) = scores.iter().find(|(_, value)| !value.is_finite()) {
            return Err(RequestError::NonFiniteScore {
                property: score_type.to_string(),
            });
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(RequestError::ConfidenceOutOfRange(confidence));
        }

        let mut request = Self {
            content_id,
            scores,
            confidence,
            encoded_len: 0,
        };
        // Finite values always serialize, so the fallback never triggers.
        request.encoded_len = serde_json::to_vec(&request).map_or(0, |bytes| bytes.len());
        Ok(request)
    }

    /// Build a request from page properties keyed by [`ScoreType::property_name`].
    ///
    /// Returns `Ok(None)` when the page carries none of the audience scores.
    /// Missing audience scores and a missing confidence default to zero.
    pub fn from_properties(
        content_id: impl Into<String>,
        properties: &HashMap<String, String>,
    ) -> Result<Option<Self>, RequestError> {
        let has_any_score = ScoreType::AUDIENCE
            .iter()
            .any(|score_type| properties.contains_key(score_type.property_name()));
        if !has_any_score {
            return Ok(None);
        }

        let mut scores = BTreeMap::new();
        for score_type in ScoreType::AUDIENCE {
            let value = parse_decimal(properties, score_type)?.unwrap_or(0.0);
            scores.insert(score_type, value);
        }
        let confidence = parse_decimal(properties, ScoreType::Confidence)?.unwrap_or(0.0);

        Self::new(content_id, scores, confidence).map(Some)
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn scores(&self) -> &BTreeMap<ScoreType, f64> {
        &self.scores
    }

    pub fn score(&self, score_type: ScoreType) -> Option<f64> {
        self.scores.get(&score_type).copied()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Length in bytes of this request's JSON encoding.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

/// True when the page carries every audience score and a confidence.
pub fn has_all_scores(properties: &HashMap<String, String>) -> bool {
    ScoreType::AUDIENCE
        .iter()
        .chain(std::iter::once(&ScoreType::Confidence))
        .all(|score_type| properties.contains_key(score_type.property_name()))
}

fn parse_decimal(
    properties: &HashMap<String, String>,
    score_type: ScoreType,
) -> Result<Option<f64>, RequestError> {
    let Some(raw) = properties.get(score_type.property_name()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|_| RequestError::InvalidDecimal {
            property: score_type.to_string(),
            value: raw.clone(),
        })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScoreUpdate {
    content_id: String,
    #[serde(default)]
    scores: BTreeMap<ScoreType, f64>,
    #[serde(default)]
    confidence: f64,
}

impl TryFrom<RawScoreUpdate> for ScoreUpdateRequest {
    type Error = RequestError;

    fn try_from(raw: RawScoreUpdate) -> Result<Self, Self::Error> {
        Self::new(raw.content_id, raw.scores, raw.confidence)
    }
}
