use crate::commands;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{command_err, conn_and_session, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let options = match setup::report_options(conn) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match commands::report_card(&SqliteStore::new(conn), ctx, &student_id, &options) {
        Ok(card) => ok(&req.id, json!(card)),
        Err(e) => command_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reportCard" => Some(handle_report_card(state, req)),
        _ => None,
    }
}
