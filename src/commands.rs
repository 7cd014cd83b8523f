//! Named operations behind each user action.
//!
//! Every command takes the caller's [`SessionContext`], validates its
//! prerequisites before touching the store, and returns a typed result or a
//! [`CommandError`] carrying a stable code.

use crate::calc::{self, CaPolicy, RankedStudent};
use crate::grading::ordinal;
use crate::model::{
    class_id_for, ClassTermAggregate, RawScores, Role, Student, StudentFilter, SubjectScore,
    TermRecord, User,
};
use crate::report::{self, ReportCard, ReportInputs, ReportOptions};
use crate::session::SessionContext;
use crate::store::{BlobStore, CommitFailed, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn no_term() -> Self {
        Self::new("no_term", "select a term first")
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    fn query(e: anyhow::Error) -> Self {
        Self::new("db_query_failed", format!("{e:#}"))
    }

    fn update(e: anyhow::Error) -> Self {
        let code = if e.downcast_ref::<CommitFailed>().is_some() {
            "db_commit_failed"
        } else {
            "db_update_failed"
        };
        Self::new(code, format!("{e:#}"))
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

pub type CommandResult<T> = Result<T, CommandError>;

// ---------------------------------------------------------------------------
// Session

pub fn begin_session<S: DocumentStore>(store: &S, user_id: &str) -> CommandResult<SessionContext> {
    let user = store
        .get_user(user_id)
        .map_err(CommandError::query)?
        .ok_or_else(|| CommandError::not_found("user record not found"))?;
    info!(user_id = %user.id, role = user.role.as_str(), "session started");
    Ok(SessionContext::for_user(&user))
}

pub fn select_term(ctx: &mut SessionContext, term: &str) -> CommandResult<()> {
    let t = term.trim();
    if t.is_empty() {
        return Err(CommandError::bad_params("term must not be empty"));
    }
    ctx.term = Some(t.to_string());
    Ok(())
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentListItem {
    pub id: String,
    pub name: String,
    pub class_label: String,
    pub photo_ref: Option<String>,
}

pub fn list_my_students<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
) -> CommandResult<Vec<StudentListItem>> {
    ctx.require_role(Role::Teacher)?;
    let students = store
        .list_students(&StudentFilter::Teacher(ctx.user_id.clone()))
        .map_err(CommandError::query)?;
    Ok(students
        .into_iter()
        .map(|s| StudentListItem {
            id: s.id,
            name: s.name,
            class_label: s.class_label,
            photo_ref: s.photo_ref,
        })
        .collect())
}

pub struct NewPhoto<'a> {
    pub bytes: &'a [u8],
    pub content_type: &'a str,
}

pub fn add_student<S: DocumentStore + BlobStore>(
    store: &S,
    ctx: &SessionContext,
    name: &str,
    photo: Option<NewPhoto<'_>>,
) -> CommandResult<Student> {
    ctx.require_role(Role::Teacher)?;
    let class_label = ctx.require_class()?.to_string();
    let name = name.trim();
    if name.is_empty() {
        return Err(CommandError::bad_params("student name must not be empty"));
    }

    let photo_ref = match photo {
        Some(p) => Some(
            store
                .store(p.bytes, p.content_type)
                .map_err(CommandError::update)?,
        ),
        None => None,
    };
    let student = Student {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        class_label,
        teacher_id: ctx.user_id.clone(),
        photo_ref,
        terms: BTreeMap::new(),
    };
    store
        .insert_student(&student)
        .map_err(CommandError::update)?;
    info!(student_id = %student.id, class = %student.class_label, "student added");
    Ok(student)
}

fn owned_student<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    student_id: &str,
) -> CommandResult<Student> {
    let student = store
        .get_student(student_id)
        .map_err(CommandError::query)?
        .ok_or_else(|| CommandError::not_found("student not found"))?;
    if student.teacher_id != ctx.user_id {
        return Err(CommandError::forbidden("student belongs to another teacher"));
    }
    Ok(student)
}

/// Re-ranks one class/term roster and writes totals and positions back to
/// every member. Call inside `atomically` so the read and write-back form one unit.
fn rerank_class<S: DocumentStore>(
    store: &S,
    class_label: &str,
    term: &str,
) -> anyhow::Result<Vec<RankedStudent>> {
    let roster = store.list_students(&StudentFilter::Class(class_label.to_string()))?;
    let ranking = calc::rank_roster(&roster, term);
    debug!(class = class_label, term, roster = roster.len(), "re-ranked class");
    store.save_many(term, &calc::ranking_updates(&ranking))?;
    Ok(ranking)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub student_id: String,
    pub reranked_terms: Vec<String>,
}

pub fn delete_student<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    student_id: &str,
) -> CommandResult<DeleteOutcome> {
    ctx.require_role(Role::Teacher)?;
    let student = owned_student(store, ctx, student_id)?;
    let terms: Vec<String> = student.terms.keys().cloned().collect();
    store
        .atomically(|s| {
            s.delete_student(&student.id)?;
            for term in &terms {
                rerank_class(s, &student.class_label, term)?;
            }
            Ok(())
        })
        .map_err(CommandError::update)?;
    info!(student_id, "student deleted");
    Ok(DeleteOutcome {
        student_id: student.id,
        reranked_terms: terms,
    })
}

// ---------------------------------------------------------------------------
// Score entry

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheetSubject {
    pub subject: String,
    pub raw: RawScores,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheet {
    pub student_id: String,
    pub student_name: String,
    pub term: String,
    pub subjects: Vec<ScoreSheetSubject>,
    pub scalars: TermScalars,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermScalars {
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
}

/// Form model for score entry: the teacher's assigned subjects with any
/// values already saved for the selected term.
pub fn open_score_sheet<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    student_id: &str,
) -> CommandResult<ScoreSheet> {
    let term = ctx.require_term()?.to_string();
    ctx.require_role(Role::Teacher)?;
    let student = owned_student(store, ctx, student_id)?;
    let existing = student.term(&term);
    let subjects = ctx
        .assigned_subjects
        .iter()
        .map(|name| ScoreSheetSubject {
            subject: name.clone(),
            raw: existing
                .and_then(|r| r.subject(name))
                .map(|s| s.raw)
                .unwrap_or_default(),
        })
        .collect();
    let scalars = existing
        .map(|r| TermScalars {
            attendance_made: r.attendance_made.clone(),
            promoted_to: r.promoted_to.clone(),
            conduct: r.conduct.clone(),
            attitude: r.attitude.clone(),
            remarks: r.remarks.clone(),
        })
        .unwrap_or_default();
    Ok(ScoreSheet {
        student_id: student.id,
        student_name: student.name,
        term,
        subjects,
        scalars,
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub subject: String,
    #[serde(flatten)]
    pub raw: RawScores,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveScoresInput {
    pub student_id: String,
    pub subjects: Vec<SubjectInput>,
    #[serde(flatten)]
    pub scalars: TermScalars,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveScoresOutcome {
    pub student_id: String,
    pub term: String,
    pub record: TermRecord,
    pub ranking: Vec<RankedStudent>,
}

const COMPONENT_BOUNDS: [(&str, f64); 6] = [
    ("quiz", calc::QUIZ_OUT_OF),
    ("test1", calc::TEST_OUT_OF),
    ("test2", calc::TEST_OUT_OF),
    ("test3", calc::TEST_OUT_OF),
    ("project", calc::PROJECT_OUT_OF),
    ("exam", calc::EXAM_OUT_OF),
];

fn validate_raw(subject: &str, raw: &RawScores) -> CommandResult<()> {
    let values = [
        raw.quiz, raw.test1, raw.test2, raw.test3, raw.project, raw.exam,
    ];
    for ((field, max), value) in COMPONENT_BOUNDS.iter().zip(values) {
        let Some(v) = value else { continue };
        if !v.is_finite() || v < 0.0 || v > *max {
            return Err(
                CommandError::bad_params(format!("{} {} must be between 0 and {}", subject, field, max))
                    .with_details(json!({ "subject": subject, "field": field, "value": v })),
            );
        }
    }
    Ok(())
}

fn build_subject_scores(
    ctx: &SessionContext,
    inputs: &[SubjectInput],
    policy: CaPolicy,
) -> CommandResult<Vec<SubjectScore>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input.subject.trim();
        if name.is_empty() {
            return Err(CommandError::bad_params("subject name must not be empty"));
        }
        if !seen.insert(name) {
            return Err(CommandError::bad_params(format!("duplicate subject {}", name)));
        }
        if !ctx.assigned_subjects.is_empty() && !ctx.assigned_subjects.iter().any(|s| s == name) {
            return Err(CommandError::bad_params(format!(
                "{} is not one of the teacher's assigned subjects",
                name
            )));
        }
        validate_raw(name, &input.raw)?;
        out.push(calc::score_subject(name, input.raw, policy));
    }
    Ok(out)
}

/// Saves one student's term record and re-ranks their whole class for the term.
pub fn save_term_scores<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    input: &SaveScoresInput,
    policy: CaPolicy,
) -> CommandResult<SaveScoresOutcome> {
    let term = ctx.require_term()?.to_string();
    ctx.require_role(Role::Teacher)?;
    let subjects = build_subject_scores(ctx, &input.subjects, policy)?;
    let student = owned_student(store, ctx, &input.student_id)?;

    let mut record = TermRecord {
        subjects,
        attendance_made: input.scalars.attendance_made.clone(),
        promoted_to: input.scalars.promoted_to.clone(),
        conduct: input.scalars.conduct.clone(),
        attitude: input.scalars.attitude.clone(),
        remarks: input.scalars.remarks.clone(),
        total_score: None,
        class_position: None,
    };

    let ranking = store
        .atomically(|s| {
            s.save_student_term_record(&student.id, &term, &record)?;
            rerank_class(s, &student.class_label, &term)
        })
        .map_err(CommandError::update)?;

    record.total_score = Some(calc::term_total(&record));
    record.class_position = calc::position_of(&ranking, &student.id);
    info!(
        student_id = %student.id,
        term = %term,
        policy = policy.as_str(),
        roster = ranking.len(),
        "term scores saved"
    );
    Ok(SaveScoresOutcome {
        student_id: student.id,
        term,
        record,
        ranking,
    })
}

// ---------------------------------------------------------------------------
// Class/term universal records

pub fn save_class_term_aggregate<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    aggregate: &ClassTermAggregate,
) -> CommandResult<String> {
    let term = ctx.require_term()?;
    ctx.require_role(Role::Teacher)?;
    let class_id = class_id_for(ctx.require_class()?);
    store
        .put_class_term_aggregate(&class_id, term, aggregate)
        .map_err(CommandError::update)?;
    info!(class_id = %class_id, term, "class term records saved");
    Ok(class_id)
}

pub fn get_class_term_aggregate<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
) -> CommandResult<ClassTermAggregate> {
    let term = ctx.require_term()?;
    ctx.require_role(Role::Teacher)?;
    let class_id = class_id_for(ctx.require_class()?);
    Ok(store
        .get_class_term_aggregate(&class_id, term)
        .map_err(CommandError::query)?
        .unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Term records table

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSortKey {
    Name,
    Subject(String),
    TotalScore,
    ClassPosition,
}

impl RecordSortKey {
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => RecordSortKey::Name,
            "totalScore" => RecordSortKey::TotalScore,
            "classPosition" => RecordSortKey::ClassPosition,
            other => RecordSortKey::Subject(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCell {
    pub subject: String,
    pub total: Option<i64>,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub student_id: String,
    pub name: String,
    pub cells: Vec<RecordCell>,
    pub total_score: Option<i64>,
    pub class_position: Option<u32>,
    pub position_display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRecordsTable {
    pub term: String,
    pub subjects: Vec<String>,
    pub rows: Vec<RecordRow>,
}

impl RecordRow {
    fn sort_value(&self, key: &RecordSortKey) -> f64 {
        match key {
            RecordSortKey::Name => 0.0,
            RecordSortKey::TotalScore => self.total_score.unwrap_or(0) as f64,
            RecordSortKey::ClassPosition => self.class_position.unwrap_or(0) as f64,
            RecordSortKey::Subject(name) => self
                .cells
                .iter()
                .find(|c| &c.subject == name)
                .and_then(|c| c.total)
                .unwrap_or(0) as f64,
        }
    }
}

/// The teacher's students that have a record for the selected term, one
/// column per subject seen across them.
pub fn term_records_table<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    sort: Option<(RecordSortKey, SortDirection)>,
    missing: &str,
) -> CommandResult<TermRecordsTable> {
    let term = ctx.require_term()?.to_string();
    ctx.require_role(Role::Teacher)?;
    let students = store
        .list_students(&StudentFilter::Teacher(ctx.user_id.clone()))
        .map_err(CommandError::query)?;

    let with_record: Vec<(&Student, &TermRecord)> = students
        .iter()
        .filter_map(|s| s.term(&term).map(|r| (s, r)))
        .collect();
    let subjects: Vec<String> = with_record
        .iter()
        .flat_map(|(_, r)| r.subjects.iter().map(|s| s.subject.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows: Vec<RecordRow> = with_record
        .iter()
        .map(|(s, r)| {
            let cells = subjects
                .iter()
                .map(|name| {
                    let total = r.subject(name).map(|sc| sc.total);
                    RecordCell {
                        subject: name.clone(),
                        total,
                        display: total
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| missing.to_string()),
                    }
                })
                .collect();
            RecordRow {
                student_id: s.id.clone(),
                name: s.name.clone(),
                cells,
                total_score: r.total_score,
                class_position: r.class_position,
                position_display: r
                    .class_position
                    .map(ordinal)
                    .unwrap_or_else(|| missing.to_string()),
            }
        })
        .collect();

    if let Some((key, direction)) = sort {
        rows.sort_by(|a, b| {
            let ord = match &key {
                RecordSortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                _ => a
                    .sort_value(&key)
                    .partial_cmp(&b.sort_value(&key))
                    .unwrap_or(Ordering::Equal),
            };
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    Ok(TermRecordsTable {
        term,
        subjects,
        rows,
    })
}

// ---------------------------------------------------------------------------
// Report card

pub fn report_card<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    student_id: &str,
    options: &ReportOptions,
) -> CommandResult<ReportCard> {
    let term = ctx.require_term()?.to_string();
    let student = match ctx.role {
        Role::Teacher => owned_student(store, ctx, student_id)?,
        Role::Admin => store
            .get_student(student_id)
            .map_err(CommandError::query)?
            .ok_or_else(|| CommandError::not_found("student not found"))?,
    };
    let teacher = store
        .get_user(&student.teacher_id)
        .map_err(CommandError::query)?
        .ok_or_else(|| CommandError::not_found("teacher record not found"))?;
    let admin = store
        .list_users(Role::Admin)
        .map_err(CommandError::query)?
        .into_iter()
        .next();
    let class_term = store
        .get_class_term_aggregate(&class_id_for(&student.class_label), &term)
        .map_err(CommandError::query)?;

    // Records saved before positions were persisted fall back to a live class query.
    let live_position = match student.term(&term).and_then(|r| r.class_position) {
        Some(_) => None,
        None => {
            let roster = store
                .list_students(&StudentFilter::Class(student.class_label.clone()))
                .map_err(CommandError::query)?;
            calc::position_of(&calc::rank_roster(&roster, &term), &student.id)
        }
    };

    let card = report::assemble_report(
        &ReportInputs {
            term: &term,
            student: &student,
            teacher: &teacher,
            admin: admin.as_ref(),
            class_term: class_term.as_ref(),
            live_position,
        },
        options,
    );
    if card.total_mismatch() {
        warn!(
            student_id = %student.id,
            term = %term,
            stored = ?card.summary.stored_total_score,
            recomputed = card.summary.total_score,
            "stored total differs from recomputed total"
        );
    }
    Ok(card)
}

// ---------------------------------------------------------------------------
// Users

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherListItem {
    pub id: String,
    pub name: String,
    pub email: String,
    pub assigned_class: String,
}

pub fn list_teachers<S: DocumentStore>(
    store: &S,
    ctx: &SessionContext,
    missing: &str,
) -> CommandResult<Vec<TeacherListItem>> {
    ctx.require_role(Role::Admin)?;
    let teachers: Vec<User> = store
        .list_users(Role::Teacher)
        .map_err(CommandError::query)?;
    Ok(teachers
        .into_iter()
        .map(|t| TeacherListItem {
            id: t.id,
            name: t.name,
            email: t.email,
            assigned_class: t
                .assigned_class
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| missing.to_string()),
        })
        .collect())
}

pub fn upload_signature<S: DocumentStore + BlobStore>(
    store: &S,
    ctx: &SessionContext,
    bytes: &[u8],
    content_type: &str,
) -> CommandResult<String> {
    if bytes.is_empty() {
        return Err(CommandError::bad_params("signature file is empty"));
    }
    let reference = store
        .atomically(|s| {
            let reference = s.store(bytes, content_type)?;
            if !s.set_user_signature(&ctx.user_id, &reference)? {
                anyhow::bail!("user {} no longer exists", ctx.user_id);
            }
            Ok(reference)
        })
        .map_err(CommandError::update)?;
    info!(user_id = %ctx.user_id, "signature uploaded");
    Ok(reference)
}
