use crate::commands::{self, SaveScoresInput};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{command_err, conn_and_session, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_scores_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match commands::open_score_sheet(&SqliteStore::new(conn), ctx, &student_id) {
        Ok(sheet) => ok(&req.id, json!({ "sheet": sheet })),
        Err(e) => command_err(req, e),
    }
}

fn handle_scores_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: SaveScoresInput = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid scores payload: {}", e), None),
    };
    let policy = match setup::ca_policy(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match commands::save_term_scores(&SqliteStore::new(conn), ctx, &input, policy) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => command_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.open" => Some(handle_scores_open(state, req)),
        "scores.save" => Some(handle_scores_save(state, req)),
        _ => None,
    }
}
