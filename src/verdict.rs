//! Structured verdict model.
//!
//! The model answers with loosely shaped JSON. [`Verdict`] is the single
//! place where that shape is pinned down: known keys (Korean names plus the
//! English aliases seen in practice) become typed optional fields, anything
//! else is kept verbatim in [`Verdict::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// JSON key of the verdict label.
pub const KEY_LABEL: &str = "진위";
/// JSON key of the justification.
pub const KEY_JUSTIFICATION: &str = "근거";
/// JSON key of the narrative analysis.
pub const KEY_ANALYSIS: &str = "분석";
/// JSON key of the summary.
pub const KEY_SUMMARY: &str = "요약";
/// JSON key of the suspect-sentence map.
pub const KEY_SUSPICIOUS: &str = "수상한문장";
/// JSON key of the verification opinion (rounds >= 2).
pub const KEY_OPINION: &str = "검증의견";

const LABEL_KEYS: &[&str] = &[KEY_LABEL, "verdict"];
const JUSTIFICATION_KEYS: &[&str] = &[KEY_JUSTIFICATION, "justification", "evidence"];
const ANALYSIS_KEYS: &[&str] = &[KEY_ANALYSIS, "analysis"];
const SUMMARY_KEYS: &[&str] = &[KEY_SUMMARY, "summary"];
const SUSPICIOUS_KEYS: &[&str] = &[
    KEY_SUSPICIOUS,
    "수상문장",
    "suspicious",
    "suspiciousSentences",
];
const OPINION_KEYS: &[&str] = &[KEY_OPINION, "verificationOpinion"];

/// The closed set of verdict labels the model is asked to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictLabel {
    /// 거짓
    False,
    /// 대체로 거짓
    MostlyFalse,
    /// 일부 사실
    PartiallyTrue,
    /// 대체로 사실
    MostlyTrue,
    /// 사실
    True,
    /// Missing or outside the closed set.
    Unknown,
}

impl VerdictLabel {
    /// All labels of the closed set, from least to most truthful.
    pub const CLOSED_SET: [VerdictLabel; 5] = [
        VerdictLabel::False,
        VerdictLabel::MostlyFalse,
        VerdictLabel::PartiallyTrue,
        VerdictLabel::MostlyTrue,
        VerdictLabel::True,
    ];

    /// Map model output onto the closed set. Whitespace is ignored so
    /// `대체로사실` and `대체로 사실` are the same label.
    pub fn from_label(text: &str) -> Self {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "거짓" => VerdictLabel::False,
            "대체로거짓" => VerdictLabel::MostlyFalse,
            "일부사실" => VerdictLabel::PartiallyTrue,
            "대체로사실" => VerdictLabel::MostlyTrue,
            "사실" => VerdictLabel::True,
            _ => VerdictLabel::Unknown,
        }
    }

    /// Korean display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictLabel::False => "거짓",
            VerdictLabel::MostlyFalse => "대체로 거짓",
            VerdictLabel::PartiallyTrue => "일부 사실",
            VerdictLabel::MostlyTrue => "대체로 사실",
            VerdictLabel::True => "사실",
            VerdictLabel::Unknown => "알 수 없음",
        }
    }

    /// Whether the label belongs to the closed set.
    pub fn is_known(&self) -> bool {
        !matches!(self, VerdictLabel::Unknown)
    }
}

impl std::fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for VerdictLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VerdictLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(VerdictLabel::from_label(&raw))
    }
}

/// Parsed result of one verification round.
///
/// Field defaults when the model omits them:
/// - `label`: `None`, displayed as [`VerdictLabel::Unknown`]
/// - `justification`, `analysis`, `summary`: `None`, rendered as empty
/// - `suspicious_sentences`: `None`, treated as an empty map
/// - `verification_opinion`: `None` (only expected from round 2 on)
///
/// Known fields remember the key and value they were parsed from, so a
/// verdict that was not edited serializes back to the object it came from.
/// Equality ignores that provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Verdict {
    /// Raw verdict label text as returned by the model.
    pub label: Option<String>,
    /// Reasons behind the verdict.
    pub justification: Option<String>,
    /// Narrative analysis.
    pub analysis: Option<String>,
    /// Short summary.
    pub summary: Option<String>,
    /// Suspect sentence text mapped to the reason it is suspect.
    pub suspicious_sentences: Option<BTreeMap<String, String>>,
    /// How this round's conclusion relates to earlier rounds.
    pub verification_opinion: Option<String>,
    /// Unrecognized fields, kept verbatim.
    pub extra: Map<String, Value>,
    /// Canonical key mapped to the source key and value it was read from.
    origin: BTreeMap<&'static str, (String, Value)>,
}

impl PartialEq for Verdict {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.justification == other.justification
            && self.analysis == other.analysis
            && self.summary == other.summary
            && self.suspicious_sentences == other.suspicious_sentences
            && self.verification_opinion == other.verification_opinion
            && self.extra == other.extra
    }
}

impl Verdict {
    /// Create a verdict with just a label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    /// Set the justification.
    pub fn justification(mut self, text: impl Into<String>) -> Self {
        self.justification = Some(text.into());
        self
    }

    /// Set the analysis.
    pub fn analysis(mut self, text: impl Into<String>) -> Self {
        self.analysis = Some(text.into());
        self
    }

    /// Set the summary.
    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    /// Set the verification opinion.
    pub fn opinion(mut self, text: impl Into<String>) -> Self {
        self.verification_opinion = Some(text.into());
        self
    }

    /// Add a suspect sentence.
    pub fn suspicious(mut self, sentence: impl Into<String>, reason: impl Into<String>) -> Self {
        self.suspicious_sentences
            .get_or_insert_with(BTreeMap::new)
            .insert(sentence.into(), reason.into());
        self
    }

    /// The label mapped onto the closed set.
    pub fn verdict_label(&self) -> VerdictLabel {
        self.label
            .as_deref()
            .map(VerdictLabel::from_label)
            .unwrap_or(VerdictLabel::Unknown)
    }

    /// Suspect sentences, empty when the model sent none.
    pub fn suspicious_or_empty(&self) -> BTreeMap<String, String> {
        self.suspicious_sentences.clone().unwrap_or_default()
    }

    /// Build a verdict from a JSON object, coercing known fields.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let mut origin = BTreeMap::new();
        let mut take = |object: &mut Map<String, Value>,
                        canonical: &'static str,
                        keys: &[&str]|
         -> Option<Value> {
            let (key, value) = take_first(object, keys)?;
            origin.insert(canonical, (key, value.clone()));
            Some(value)
        };

        let label = take(&mut object, KEY_LABEL, LABEL_KEYS).and_then(coerce_text);
        let justification =
            take(&mut object, KEY_JUSTIFICATION, JUSTIFICATION_KEYS).and_then(coerce_text);
        let analysis = take(&mut object, KEY_ANALYSIS, ANALYSIS_KEYS).and_then(coerce_text);
        let summary = take(&mut object, KEY_SUMMARY, SUMMARY_KEYS).and_then(coerce_text);
        let suspicious_sentences =
            take(&mut object, KEY_SUSPICIOUS, SUSPICIOUS_KEYS).map(sentence_map);
        let verification_opinion =
            take(&mut object, KEY_OPINION, OPINION_KEYS).and_then(coerce_text);

        Self {
            label,
            justification,
            analysis,
            summary,
            suspicious_sentences,
            verification_opinion,
            extra: object,
            origin,
        }
    }
}

fn take_first(object: &mut Map<String, Value>, keys: &[&str]) -> Option<(String, Value)> {
    let key = keys.iter().find(|key| object.contains_key(**key))?;
    object.remove(*key).map(|value| (key.to_string(), value))
}

/// Coerce a JSON value into display text. Lists of strings are joined
/// line by line; `null` counts as absent.
fn coerce_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(coerce_text)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        object @ Value::Object(_) => Some(object.to_string()),
    }
}

fn sentence_map(value: Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(sentence, reason)| (sentence, coerce_text(reason).unwrap_or_default()))
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(coerce_text)
            .map(|sentence| (sentence, String::new()))
            .collect(),
        other => coerce_text(other)
            .map(|sentence| BTreeMap::from([(sentence, String::new())]))
            .unwrap_or_default(),
    }
}

impl From<Map<String, Value>> for Verdict {
    fn from(object: Map<String, Value>) -> Self {
        Verdict::from_object(object)
    }
}

impl From<Verdict> for Map<String, Value> {
    fn from(verdict: Verdict) -> Self {
        let Verdict {
            label,
            justification,
            analysis,
            summary,
            suspicious_sentences,
            verification_opinion,
            extra,
            mut origin,
        } = verdict;

        let mut object = extra;
        for (canonical, value) in [
            (KEY_LABEL, label),
            (KEY_JUSTIFICATION, justification),
            (KEY_ANALYSIS, analysis),
            (KEY_SUMMARY, summary),
            (KEY_OPINION, verification_opinion),
        ] {
            write_field(&mut object, &mut origin, canonical, value, coerce_text, Value::String);
        }
        write_field(
            &mut object,
            &mut origin,
            KEY_SUSPICIOUS,
            suspicious_sentences,
            |value| Some(sentence_map(value)),
            |sentences| {
                Value::Object(
                    sentences
                        .into_iter()
                        .map(|(sentence, reason)| (sentence, Value::String(reason)))
                        .collect(),
                )
            },
        );
        object
    }
}

/// Write one known field: the source key and value when the typed field
/// still matches them, otherwise the canonical key and typed value.
fn write_field<T: PartialEq>(
    object: &mut Map<String, Value>,
    origin: &mut BTreeMap<&'static str, (String, Value)>,
    canonical: &'static str,
    typed: Option<T>,
    coerce: impl Fn(Value) -> Option<T>,
    render: impl Fn(T) -> Value,
) {
    if let Some((key, value)) = origin.remove(canonical) {
        if coerce(value.clone()) == typed {
            object.insert(key, value);
            return;
        }
    }
    if let Some(typed) = typed {
        object.insert(canonical.to_string(), render(typed));
    }
}

/// Outcome of one round: a structured verdict, or the cleaned model text
/// when no JSON could be recovered from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    /// Parsed verdict object.
    Structured(Verdict),
    /// Unparseable model output, shown as-is.
    Raw(String),
}

impl AnalysisResult {
    /// The structured verdict, if parsing succeeded.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            AnalysisResult::Structured(verdict) => Some(verdict),
            AnalysisResult::Raw(_) => None,
        }
    }

    /// Label for display; raw text is always [`VerdictLabel::Unknown`].
    pub fn label(&self) -> VerdictLabel {
        self.verdict()
            .map(Verdict::verdict_label)
            .unwrap_or(VerdictLabel::Unknown)
    }

    /// Whether the round degraded to raw text.
    pub fn is_raw(&self) -> bool {
        matches!(self, AnalysisResult::Raw(_))
    }
}

impl From<Verdict> for AnalysisResult {
    fn from(verdict: Verdict) -> Self {
        AnalysisResult::Structured(verdict)
    }
}
