use crate::commands::{self, RecordSortKey, SortDirection};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{command_err, conn_and_session, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn parse_sort(req: &Request) -> Result<Option<(RecordSortKey, SortDirection)>, serde_json::Value> {
    let Some(key) = optional_str(req, "sortBy").filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let direction = match optional_str(req, "sortDirection")
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "sortDirection must be one of: asc, desc",
                Some(json!({ "sortDirection": other })),
            ))
        }
    };
    Ok(Some((RecordSortKey::parse(key.trim()), direction)))
}

fn handle_term_table(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, ctx) = match conn_and_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sort = match parse_sort(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let options = match setup::report_options(conn) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match commands::term_records_table(
        &SqliteStore::new(conn),
        ctx,
        sort,
        &options.missing_value_text,
    ) {
        Ok(table) => ok(&req.id, json!(table)),
        Err(e) => command_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.termTable" => Some(handle_term_table(state, req)),
        _ => None,
    }
}
