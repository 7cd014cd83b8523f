use crate::model::{RawScores, Student, SubjectScore, TermRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How raw components are folded into the continuous-assessment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaPolicy {
    /// Each component contributes at most 10, so CA tops out at 50 on its own.
    #[default]
    Normalized,
    /// Each component is scaled to 50 and the sum is capped at 50.
    LegacyCapped,
}

impl CaPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normalized" => Some(CaPolicy::Normalized),
            "legacyCapped" => Some(CaPolicy::LegacyCapped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaPolicy::Normalized => "normalized",
            CaPolicy::LegacyCapped => "legacyCapped",
        }
    }
}

pub const QUIZ_OUT_OF: f64 = 20.0;
pub const TEST_OUT_OF: f64 = 10.0;
pub const PROJECT_OUT_OF: f64 = 30.0;
pub const EXAM_OUT_OF: f64 = 100.0;
pub const CA_MAX: f64 = 50.0;
pub const EXAM_WEIGHT: f64 = 50.0;

/// Half-up rounding to an integer: `floor(x + 0.5)`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Half-up rounding to 2 decimals, used for report averages.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn continuous_assessment(raw: &RawScores, policy: CaPolicy) -> i64 {
    let parts = [
        (raw.quiz, QUIZ_OUT_OF),
        (raw.test1, TEST_OUT_OF),
        (raw.test2, TEST_OUT_OF),
        (raw.test3, TEST_OUT_OF),
        (raw.project, PROJECT_OUT_OF),
    ];
    let scale = match policy {
        CaPolicy::Normalized => 10.0,
        CaPolicy::LegacyCapped => CA_MAX,
    };
    let mut ca_raw: f64 = parts
        .iter()
        .map(|(v, out_of)| v.unwrap_or(0.0) / out_of * scale)
        .sum();
    if policy == CaPolicy::LegacyCapped && ca_raw > CA_MAX {
        ca_raw = CA_MAX;
    }
    round_half_up(ca_raw)
}

pub fn exam_scaled(exam: Option<f64>) -> i64 {
    round_half_up(exam.unwrap_or(0.0) / EXAM_OUT_OF * EXAM_WEIGHT)
}

pub fn score_subject(subject: &str, raw: RawScores, policy: CaPolicy) -> SubjectScore {
    let ca = continuous_assessment(&raw, policy);
    let exam = exam_scaled(raw.exam);
    SubjectScore {
        subject: subject.to_string(),
        raw,
        ca,
        exam_scaled: exam,
        total: ca + exam,
    }
}

pub fn term_total(record: &TermRecord) -> i64 {
    record.subjects.iter().map(|s| s.total).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub total_score: i64,
    pub class_position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub total_score: i64,
    pub class_position: u32,
}

/// Ranks a class roster for one term. Students without a record for the term
/// rank with a total of 0. Ties keep roster order, so positions are always
/// exactly `1..=N`.
pub fn rank_roster(roster: &[Student], term: &str) -> Vec<RankedStudent> {
    let mut totals: Vec<(&str, i64)> = roster
        .iter()
        .map(|s| (s.id.as_str(), s.term(term).map(term_total).unwrap_or(0)))
        .collect();
    // sort_by is stable.
    totals.sort_by(|a, b| b.1.cmp(&a.1));
    totals
        .into_iter()
        .enumerate()
        .map(|(i, (id, total))| RankedStudent {
            student_id: id.to_string(),
            total_score: total,
            class_position: (i + 1) as u32,
        })
        .collect()
}

pub fn ranking_updates(ranking: &[RankedStudent]) -> BTreeMap<String, RankEntry> {
    ranking
        .iter()
        .map(|r| {
            (
                r.student_id.clone(),
                RankEntry {
                    total_score: r.total_score,
                    class_position: r.class_position,
                },
            )
        })
        .collect()
}

pub fn position_of(ranking: &[RankedStudent], student_id: &str) -> Option<u32> {
    ranking
        .iter()
        .find(|r| r.student_id == student_id)
        .map(|r| r.class_position)
}
