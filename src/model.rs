use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub assigned_department: Option<String>,
    pub assigned_class: Option<String>,
    #[serde(default)]
    pub assigned_subjects: Vec<String>,
    pub signature_ref: Option<String>,
}

/// Raw assessment inputs for one subject. Absent components count as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScores {
    pub quiz: Option<f64>,
    pub test1: Option<f64>,
    pub test2: Option<f64>,
    pub test3: Option<f64>,
    pub project: Option<f64>,
    pub exam: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    #[serde(flatten)]
    pub raw: RawScores,
    pub ca: i64,
    pub exam_scaled: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRecord {
    /// Subjects in entry order; names are unique within a record.
    #[serde(default)]
    pub subjects: Vec<SubjectScore>,
    #[serde(default)]
    pub attendance_made: String,
    #[serde(default)]
    pub promoted_to: String,
    #[serde(default)]
    pub conduct: String,
    #[serde(default)]
    pub attitude: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_position: Option<u32>,
}

impl TermRecord {
    pub fn subject(&self, name: &str) -> Option<&SubjectScore> {
        self.subjects.iter().find(|s| s.subject == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_label: String,
    pub teacher_id: String,
    pub photo_ref: Option<String>,
    /// Term identifier -> record for that term.
    #[serde(default)]
    pub terms: BTreeMap<String, TermRecord>,
}

impl Student {
    pub fn term(&self, term: &str) -> Option<&TermRecord> {
        self.terms.get(term)
    }
}

/// Per-class, per-term "universal records" entered once by the class teacher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTermAggregate {
    #[serde(default)]
    pub total_attendance: String,
    #[serde(default)]
    pub vacation_date: String,
    #[serde(default)]
    pub reopening_date: String,
    #[serde(default)]
    pub number_on_roll: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentFilter {
    Teacher(String),
    Class(String),
}

/// Storage key for a class label: lower-cased, whitespace runs collapsed to `-`.
pub fn class_id_for(class_label: &str) -> String {
    class_label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_id_collapses_whitespace() {
        assert_eq!(class_id_for("Primary 1"), "primary-1");
        assert_eq!(class_id_for("J.H.S.  3"), "j.h.s.-3");
        assert_eq!(class_id_for("K.G. 2"), "k.g.-2");
    }

    #[test]
    fn term_record_reads_documents_without_derived_fields() {
        let raw = serde_json::json!({
            "subjects": [
                { "subject": "Science", "quiz": 10.0, "exam": 80.0, "ca": 20, "examScaled": 40, "total": 60 }
            ],
            "conduct": "Good"
        });
        let rec: TermRecord = serde_json::from_value(raw).expect("term record");
        assert_eq!(rec.total_score, None);
        assert_eq!(rec.class_position, None);
        assert_eq!(rec.subject("Science").map(|s| s.raw.exam), Some(Some(80.0)));
        assert_eq!(rec.attitude, "");
    }
}
