use crate::commands::{self, NewPhoto};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    command_err, conn_and_session, data_url_content_type, optional_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match commands::list_my_students(&SqliteStore::new(conn), ctx) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => command_err(req, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let photo_url = optional_str(req, "photoDataUrl").filter(|s| !s.is_empty());
    let photo = photo_url.as_deref().map(|url| NewPhoto {
        bytes: url.as_bytes(),
        content_type: data_url_content_type(url).unwrap_or("application/octet-stream"),
    });
    match commands::add_student(&SqliteStore::new(conn), ctx, &name, photo) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => command_err(req, e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match commands::delete_student(&SqliteStore::new(conn), ctx, &student_id) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => command_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
