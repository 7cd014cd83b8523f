use crate::calc::{exam_scaled, round_off_2_decimals};
use crate::grading::{format_report_date, grade_for, ordinal};
use crate::model::{ClassTermAggregate, Student, TermRecord, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    pub missing_value_text: String,
    pub show_generated_at: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            missing_value_text: "N/A".to_string(),
            show_generated_at: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Stored,
    Live,
    None,
}

pub struct ReportInputs<'a> {
    pub term: &'a str,
    pub student: &'a Student,
    pub teacher: &'a User,
    pub admin: Option<&'a User>,
    pub class_term: Option<&'a ClassTermAggregate>,
    /// Position computed from a live class query, used only when the term
    /// record carries no stored position.
    pub live_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub subject: String,
    pub ca: i64,
    pub exam_scaled: i64,
    pub total: i64,
    pub grade: &'static str,
    pub remark: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_score: i64,
    pub stored_total_score: Option<i64>,
    pub subject_count: usize,
    pub average_score: f64,
    pub position: Option<u32>,
    pub position_display: String,
    pub position_source: PositionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTermFields {
    pub attendance_made: String,
    pub promoted_to: String,
    pub conduct: String,
    pub attitude: String,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportClassTerm {
    pub number_on_roll: String,
    pub total_attendance: String,
    pub vacation_date: String,
    pub reopening_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student_id: String,
    pub student_name: String,
    pub class_label: String,
    pub term: String,
    pub photo_ref: Option<String>,
    pub teacher_name: String,
    pub teacher_signature_ref: Option<String>,
    pub admin_signature_ref: Option<String>,
    pub rows: Vec<ReportRow>,
    pub summary: ReportSummary,
    pub term_fields: ReportTermFields,
    pub class_term: ReportClassTerm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

impl ReportCard {
    /// True when the stored aggregate disagrees with the recomputed one.
    pub fn total_mismatch(&self) -> bool {
        self.summary
            .stored_total_score
            .map(|t| t != self.summary.total_score)
            .unwrap_or(false)
    }
}

fn or_missing(value: &str, missing: &str) -> String {
    if value.trim().is_empty() {
        missing.to_string()
    } else {
        value.to_string()
    }
}

fn report_rows(record: &TermRecord) -> Vec<ReportRow> {
    record
        .subjects
        .iter()
        .map(|s| {
            // Exam contribution is recomputed from the raw exam, CA is taken as stored.
            let exam = exam_scaled(s.raw.exam);
            let total = s.ca + exam;
            let g = grade_for(total as f64);
            ReportRow {
                subject: s.subject.clone(),
                ca: s.ca,
                exam_scaled: exam,
                total,
                grade: g.grade,
                remark: g.remark,
            }
        })
        .collect()
}

pub fn assemble_report(inputs: &ReportInputs<'_>, options: &ReportOptions) -> ReportCard {
    let missing = options.missing_value_text.as_str();
    let empty = TermRecord::default();
    let record = inputs.student.term(inputs.term).unwrap_or(&empty);

    let rows = report_rows(record);
    let total_score: i64 = rows.iter().map(|r| r.total).sum();
    let subject_count = rows.len();
    let average_score = round_off_2_decimals(total_score as f64 / subject_count.max(1) as f64);

    let (position, position_source) = match (record.class_position, inputs.live_position) {
        (Some(p), _) => (Some(p), PositionSource::Stored),
        (None, Some(p)) => (Some(p), PositionSource::Live),
        (None, None) => (None, PositionSource::None),
    };
    let position_display = position
        .map(ordinal)
        .unwrap_or_else(|| missing.to_string());

    let class_term = match inputs.class_term {
        Some(ct) => ReportClassTerm {
            number_on_roll: or_missing(&ct.number_on_roll, missing),
            total_attendance: or_missing(&ct.total_attendance, missing),
            vacation_date: format_report_date(&ct.vacation_date, missing),
            reopening_date: format_report_date(&ct.reopening_date, missing),
        },
        None => ReportClassTerm {
            number_on_roll: missing.to_string(),
            total_attendance: missing.to_string(),
            vacation_date: missing.to_string(),
            reopening_date: missing.to_string(),
        },
    };

    ReportCard {
        student_id: inputs.student.id.clone(),
        student_name: inputs.student.name.clone(),
        class_label: inputs.student.class_label.clone(),
        term: inputs.term.to_string(),
        photo_ref: inputs.student.photo_ref.clone(),
        teacher_name: inputs.teacher.name.clone(),
        teacher_signature_ref: inputs.teacher.signature_ref.clone(),
        admin_signature_ref: inputs.admin.and_then(|a| a.signature_ref.clone()),
        rows,
        summary: ReportSummary {
            total_score,
            stored_total_score: record.total_score,
            subject_count,
            average_score,
            position,
            position_display,
            position_source,
        },
        term_fields: ReportTermFields {
            attendance_made: or_missing(&record.attendance_made, missing),
            promoted_to: or_missing(&record.promoted_to, missing),
            conduct: or_missing(&record.conduct, missing),
            attitude: or_missing(&record.attitude, missing),
            remarks: or_missing(&record.remarks, missing),
        },
        class_term,
        generated_at: options
            .show_generated_at
            .then(|| chrono::Utc::now().to_rfc3339()),
    }
}
