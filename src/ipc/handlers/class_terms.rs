use crate::commands;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{command_err, conn_and_session};
use crate::ipc::types::{AppState, Request};
use crate::model::ClassTermAggregate;
use crate::store::SqliteStore;
use serde_json::json;

fn handle_class_term_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match commands::get_class_term_aggregate(&SqliteStore::new(conn), ctx) {
        Ok(aggregate) => ok(&req.id, json!({ "records": aggregate })),
        Err(e) => command_err(req, e),
    }
}

fn handle_class_term_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("records") else {
        return err(&req.id, "bad_params", "missing records", None);
    };
    let aggregate: ClassTermAggregate = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid records: {}", e), None),
    };
    match commands::save_class_term_aggregate(&SqliteStore::new(conn), ctx, &aggregate) {
        Ok(class_id) => ok(&req.id, json!({ "classId": class_id, "records": aggregate })),
        Err(e) => command_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classTerm.get" => Some(handle_class_term_get(state, req)),
        "classTerm.save" => Some(handle_class_term_save(state, req)),
        _ => None,
    }
}
