//! Storage seams for the record-keeping core.
//!
//! `DocumentStore` and `BlobStore` are the only capabilities the commands
//! need. `SqliteStore` implements both over a workspace connection, keeping
//! each student's term records as one JSON document.

use crate::calc::RankEntry;
use crate::model::{ClassTermAggregate, Role, Student, StudentFilter, TermRecord, User};
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub trait DocumentStore {
    fn get_student(&self, id: &str) -> anyhow::Result<Option<Student>>;
    /// Students in enrolment order.
    fn list_students(&self, filter: &StudentFilter) -> anyhow::Result<Vec<Student>>;
    fn insert_student(&self, student: &Student) -> anyhow::Result<()>;
    fn delete_student(&self, id: &str) -> anyhow::Result<bool>;
    /// Replaces the whole record for `term`.
    fn save_student_term_record(&self, id: &str, term: &str, record: &TermRecord)
        -> anyhow::Result<()>;
    /// Writes only `totalScore`/`classPosition` for `term` on each listed student.
    fn save_many(&self, term: &str, updates: &BTreeMap<String, RankEntry>) -> anyhow::Result<()>;
    fn get_class_term_aggregate(
        &self,
        class_id: &str,
        term: &str,
    ) -> anyhow::Result<Option<ClassTermAggregate>>;
    fn put_class_term_aggregate(
        &self,
        class_id: &str,
        term: &str,
        aggregate: &ClassTermAggregate,
    ) -> anyhow::Result<()>;
    fn get_user(&self, id: &str) -> anyhow::Result<Option<User>>;
    fn list_users(&self, role: Role) -> anyhow::Result<Vec<User>>;
    fn set_user_signature(&self, id: &str, reference: &str) -> anyhow::Result<bool>;
    /// Runs `f` as one unit: either every write inside it lands or none does.
    fn atomically<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> anyhow::Result<T>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait BlobStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String>;
    fn fetch(&self, reference: &str) -> anyhow::Result<Option<Blob>>;
}

/// Marks an `atomically` failure that happened at commit time.
#[derive(Debug)]
pub struct CommitFailed;

impl std::fmt::Display for CommitFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to commit transaction")
    }
}

/// Content-addressed reference for a blob.
pub fn blob_reference(bytes: &[u8]) -> String {
    format!("blob:sha256:{:x}", Sha256::digest(bytes))
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_terms(&self, id: &str) -> anyhow::Result<Option<BTreeMap<String, TermRecord>>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT terms_json FROM students WHERE id = ?", [id], |r| {
                r.get(0)
            })
            .optional()?;
        match raw {
            Some(text) => Ok(Some(parse_terms(id, &text)?)),
            None => Ok(None),
        }
    }

    fn store_terms(&self, id: &str, terms: &BTreeMap<String, TermRecord>) -> anyhow::Result<()> {
        let text = serde_json::to_string(terms)?;
        self.conn.execute(
            "UPDATE students SET terms_json = ?, updated_at = ? WHERE id = ?",
            (text, now_stamp(), id),
        )?;
        Ok(())
    }
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_terms(id: &str, text: &str) -> anyhow::Result<BTreeMap<String, TermRecord>> {
    serde_json::from_str(text).with_context(|| format!("corrupt term records for student {}", id))
}

type StudentRow = (String, String, String, String, Option<String>, String);

fn student_from_row(row: StudentRow) -> anyhow::Result<Student> {
    let (id, name, class_label, teacher_id, photo_ref, terms_json) = row;
    let terms = parse_terms(&id, &terms_json)?;
    Ok(Student {
        id,
        name,
        class_label,
        teacher_id,
        photo_ref,
        terms,
    })
}

type UserRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

fn user_from_row(row: UserRow) -> anyhow::Result<User> {
    let (id, name, email, role, department, class, subjects_json, signature_ref) = row;
    let role = Role::parse(&role).ok_or_else(|| anyhow!("user {} has unknown role {}", id, role))?;
    let assigned_subjects: Vec<String> = serde_json::from_str(&subjects_json)
        .with_context(|| format!("corrupt subject list for user {}", id))?;
    Ok(User {
        id,
        name,
        email,
        role,
        assigned_department: department,
        assigned_class: class,
        assigned_subjects,
        signature_ref,
    })
}

const STUDENT_COLUMNS: &str = "id, name, class_label, teacher_id, photo_ref, terms_json";
const USER_COLUMNS: &str = "id, name, email, role, assigned_department, assigned_class, assigned_subjects_json, signature_ref";

impl DocumentStore for SqliteStore<'_> {
    fn get_student(&self, id: &str) -> anyhow::Result<Option<Student>> {
        let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
        let row: Option<StudentRow> = self
            .conn
            .query_row(&sql, [id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })
            .optional()?;
        row.map(student_from_row).transpose()
    }

    fn list_students(&self, filter: &StudentFilter) -> anyhow::Result<Vec<Student>> {
        let (column, value) = match filter {
            StudentFilter::Teacher(id) => ("teacher_id", id.as_str()),
            StudentFilter::Class(label) => ("class_label", label.as_str()),
        };
        let sql = format!(
            "SELECT {} FROM students WHERE {} = ? ORDER BY sort_order",
            STUDENT_COLUMNS, column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([value], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<Result<Vec<StudentRow>, _>>()?;
        rows.into_iter().map(student_from_row).collect()
    }

    fn insert_student(&self, student: &Student) -> anyhow::Result<()> {
        let next_sort: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO students(id, name, class_label, teacher_id, photo_ref, terms_json, sort_order, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &student.id,
                &student.name,
                &student.class_label,
                &student.teacher_id,
                &student.photo_ref,
                serde_json::to_string(&student.terms)?,
                next_sort,
                now_stamp(),
            ),
        )?;
        Ok(())
    }

    fn delete_student(&self, id: &str) -> anyhow::Result<bool> {
        let n = self.conn.execute("DELETE FROM students WHERE id = ?", [id])?;
        Ok(n > 0)
    }

    fn save_student_term_record(
        &self,
        id: &str,
        term: &str,
        record: &TermRecord,
    ) -> anyhow::Result<()> {
        let mut terms = self
            .load_terms(id)?
            .ok_or_else(|| anyhow!("student {} not found", id))?;
        terms.insert(term.to_string(), record.clone());
        self.store_terms(id, &terms)
    }

    fn save_many(&self, term: &str, updates: &BTreeMap<String, RankEntry>) -> anyhow::Result<()> {
        for (id, entry) in updates {
            let Some(mut terms) = self.load_terms(id)? else {
                // Removed since the roster was read; nothing to stamp.
                continue;
            };
            let rec = terms.entry(term.to_string()).or_default();
            rec.total_score = Some(entry.total_score);
            rec.class_position = Some(entry.class_position);
            self.store_terms(id, &terms)?;
        }
        Ok(())
    }

    fn get_class_term_aggregate(
        &self,
        class_id: &str,
        term: &str,
    ) -> anyhow::Result<Option<ClassTermAggregate>> {
        let row = self
            .conn
            .query_row(
                "SELECT total_attendance, vacation_date, reopening_date, number_on_roll
                 FROM class_terms
                 WHERE class_id = ? AND term = ?",
                (class_id, term),
                |r| {
                    Ok(ClassTermAggregate {
                        total_attendance: r.get(0)?,
                        vacation_date: r.get(1)?,
                        reopening_date: r.get(2)?,
                        number_on_roll: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn put_class_term_aggregate(
        &self,
        class_id: &str,
        term: &str,
        aggregate: &ClassTermAggregate,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO class_terms(class_id, term, total_attendance, vacation_date, reopening_date, number_on_roll)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id, term) DO UPDATE SET
               total_attendance = excluded.total_attendance,
               vacation_date = excluded.vacation_date,
               reopening_date = excluded.reopening_date,
               number_on_roll = excluded.number_on_roll",
            (
                class_id,
                term,
                &aggregate.total_attendance,
                &aggregate.vacation_date,
                &aggregate.reopening_date,
                &aggregate.number_on_roll,
            ),
        )?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row: Option<UserRow> = self
            .conn
            .query_row(&sql, [id], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            })
            .optional()?;
        row.map(user_from_row).transpose()
    }

    fn list_users(&self, role: Role) -> anyhow::Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE role = ? ORDER BY rowid",
            USER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([role.as_str()], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            })?
            .collect::<Result<Vec<UserRow>, _>>()?;
        rows.into_iter().map(user_from_row).collect()
    }

    fn set_user_signature(&self, id: &str, reference: &str) -> anyhow::Result<bool> {
        let n = self.conn.execute(
            "UPDATE users SET signature_ref = ? WHERE id = ?",
            (reference, id),
        )?;
        Ok(n > 0)
    }

    fn atomically<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> anyhow::Result<T>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to begin transaction")?;
        let out = f(self)?;
        tx.commit()
            .map_err(|e| anyhow::Error::new(e).context(CommitFailed))?;
        Ok(out)
    }
}

impl BlobStore for SqliteStore<'_> {
    fn store(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String> {
        let reference = blob_reference(bytes);
        self.conn.execute(
            "INSERT INTO blobs(reference, content_type, bytes) VALUES(?, ?, ?)
             ON CONFLICT(reference) DO NOTHING",
            (&reference, content_type, bytes),
        )?;
        Ok(reference)
    }

    fn fetch(&self, reference: &str) -> anyhow::Result<Option<Blob>> {
        let row = self
            .conn
            .query_row(
                "SELECT content_type, bytes FROM blobs WHERE reference = ?",
                [reference],
                |r| {
                    Ok(Blob {
                        content_type: r.get(0)?,
                        bytes: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn student(id: &str, class_label: &str) -> Student {
        Student {
            id: id.to_string(),
            name: format!("Student {}", id),
            class_label: class_label.to_string(),
            teacher_id: "t1".to_string(),
            photo_ref: None,
            terms: BTreeMap::new(),
        }
    }

    #[test]
    fn students_list_in_enrolment_order() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        for id in ["z", "a", "m"] {
            store.insert_student(&student(id, "Primary 1")).expect("insert");
        }
        store.insert_student(&student("other", "Primary 2")).expect("insert");
        let ids: Vec<String> = store
            .list_students(&StudentFilter::Class("Primary 1".into()))
            .expect("list")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn save_many_touches_only_rank_fields() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        store.insert_student(&student("s1", "Primary 1")).expect("insert");
        let rec = TermRecord {
            conduct: "Calm".into(),
            ..TermRecord::default()
        };
        store
            .save_student_term_record("s1", "Term 1", &rec)
            .expect("save");
        let mut updates = BTreeMap::new();
        updates.insert(
            "s1".to_string(),
            RankEntry {
                total_score: 140,
                class_position: 2,
            },
        );
        updates.insert(
            "gone".to_string(),
            RankEntry {
                total_score: 0,
                class_position: 3,
            },
        );
        store.save_many("Term 1", &updates).expect("save many");
        let loaded = store.get_student("s1").expect("get").expect("exists");
        let t = loaded.term("Term 1").expect("term");
        assert_eq!(t.conduct, "Calm");
        assert_eq!(t.total_score, Some(140));
        assert_eq!(t.class_position, Some(2));
    }

    #[test]
    fn failed_unit_rolls_back() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        store.insert_student(&student("s1", "Primary 1")).expect("insert");
        let res: anyhow::Result<()> = store.atomically(|s| {
            s.save_student_term_record("s1", "Term 1", &TermRecord::default())?;
            Err(anyhow!("boom"))
        });
        assert!(res.is_err());
        let loaded = store.get_student("s1").expect("get").expect("exists");
        assert!(loaded.terms.is_empty());
    }

    #[test]
    fn blobs_are_content_addressed() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let a = store.store(b"signature", "image/png").expect("store");
        let b = store.store(b"signature", "image/png").expect("store again");
        assert_eq!(a, b);
        assert!(a.starts_with("blob:sha256:"));
        let blob = store.fetch(&a).expect("fetch").expect("present");
        assert_eq!(blob.bytes, b"signature".to_vec());
        assert_eq!(store.fetch("blob:sha256:missing").expect("fetch"), None);
    }
}
