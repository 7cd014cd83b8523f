use crate::commands;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    command_err, conn_and_session, data_url_content_type, db_conn, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{BlobStore, SqliteStore};
use serde_json::json;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let options = match setup::report_options(conn) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match commands::list_teachers(&SqliteStore::new(conn), ctx, &options.missing_value_text) {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => command_err(req, e),
    }
}

fn handle_signature_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data_url = match required_str(req, "dataUrl") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(content_type) = data_url_content_type(&data_url) else {
        return err(&req.id, "bad_params", "dataUrl must be a data: URL", None);
    };
    match commands::upload_signature(
        &SqliteStore::new(conn),
        ctx,
        data_url.as_bytes(),
        content_type,
    ) {
        Ok(reference) => ok(&req.id, json!({ "signatureRef": reference })),
        Err(e) => command_err(req, e),
    }
}

fn handle_blobs_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reference = match required_str(req, "reference") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).fetch(&reference) {
        Ok(Some(blob)) => ok(
            &req.id,
            json!({
                "reference": reference,
                "contentType": blob.content_type,
                "dataUrl": String::from_utf8_lossy(&blob.bytes)
            }),
        ),
        Ok(None) => err(&req.id, "not_found", "blob not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "signature.upload" => Some(handle_signature_upload(state, req)),
        "blobs.get" => Some(handle_blobs_get(state, req)),
        _ => None,
    }
}
