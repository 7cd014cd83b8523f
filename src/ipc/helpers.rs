use crate::commands::CommandError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a SessionContext, serde_json::Value> {
    state
        .session
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_session", "begin a session first", None))
}

/// Workspace connection and session together, the prerequisite of most methods.
pub fn conn_and_session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, &'a SessionContext), serde_json::Value> {
    let conn = db_conn(state, req)?;
    let ctx = session(state, req)?;
    Ok((conn, ctx))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn command_err(req: &Request, e: CommandError) -> serde_json::Value {
    err(&req.id, e.code, e.message, e.details)
}

/// Content type declared by a `data:` URL, e.g. `image/png`.
pub fn data_url_content_type(data_url: &str) -> Option<&str> {
    let rest = data_url.strip_prefix("data:")?;
    let (head, _) = rest.split_once(',')?;
    let mime = head.split(';').next().unwrap_or("").trim();
    if mime.is_empty() {
        None
    } else {
        Some(mime)
    }
}
