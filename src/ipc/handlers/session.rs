use crate::commands;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{command_err, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_session_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };
        match commands::begin_session(&SqliteStore::new(conn), &user_id) {
            Ok(ctx) => ctx,
            Err(e) => return command_err(req, e),
        }
    };
    let result = json!({ "session": ctx });
    state.session = Some(ctx);
    ok(&req.id, result)
}

fn handle_session_select_term(state: &mut AppState, req: &Request) -> serde_json::Value {
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ctx) = state.session.as_mut() else {
        return err(&req.id, "no_session", "begin a session first", None);
    };
    if let Err(e) = commands::select_term(ctx, &term) {
        return command_err(req, e);
    }
    ok(&req.id, json!({ "session": ctx }))
}

fn handle_session_end(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ended = state.session.take().is_some();
    ok(&req.id, json!({ "ended": ended }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.begin" => Some(handle_session_begin(state, req)),
        "session.selectTerm" => Some(handle_session_select_term(state, req)),
        "session.end" => Some(handle_session_end(state, req)),
        _ => None,
    }
}
