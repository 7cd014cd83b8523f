use crate::calc::CaPolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::ReportOptions;
use serde_json::{json, Map, Value};
use tracing::warn;

#[derive(Clone, Copy)]
enum SetupSection {
    Calc,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "calc" => Some(Self::Calc),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Calc => "setup.calc",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Calc => json!({
            "caPolicy": CaPolicy::default().as_str()
        }),
        SetupSection::Reports => {
            let d = ReportOptions::default();
            json!({
                "missingValueText": d.missing_value_text,
                "showGeneratedAt": d.show_generated_at
            })
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Calc => match k.as_str() {
                "caPolicy" => {
                    let s = parse_string_max(v, k, 24)?;
                    let Some(policy) = CaPolicy::parse(&s) else {
                        return Err("caPolicy must be one of: normalized, legacyCapped".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                _ => return Err(format!("unknown calc field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "missingValueText" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 16)?));
                }
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                warn!(key = section.key(), %msg, "ignoring stored setup value");
            }
        }
    }
    Ok(current)
}

/// Policy used when scoring new saves.
pub fn ca_policy(conn: &rusqlite::Connection) -> anyhow::Result<CaPolicy> {
    let section = load_section(conn, SetupSection::Calc)?;
    Ok(section
        .get("caPolicy")
        .and_then(|v| v.as_str())
        .and_then(CaPolicy::parse)
        .unwrap_or_default())
}

pub fn report_options(conn: &rusqlite::Connection) -> anyhow::Result<ReportOptions> {
    let section = load_section(conn, SetupSection::Reports)?;
    Ok(serde_json::from_value(section)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let calc = match load_section(conn, SetupSection::Calc) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "calc": calc,
            "reports": reports
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn defaults_apply_without_saved_settings() {
        let conn = memory_conn();
        assert_eq!(ca_policy(&conn).expect("policy"), CaPolicy::Normalized);
        assert_eq!(report_options(&conn).expect("options"), ReportOptions::default());
    }

    #[test]
    fn malformed_saved_value_keeps_default() {
        let conn = memory_conn();
        db::settings_set_json(&conn, "setup.calc", &json!({ "caPolicy": "weird" })).expect("set");
        assert_eq!(ca_policy(&conn).expect("policy"), CaPolicy::Normalized);
        db::settings_set_json(&conn, "setup.calc", &json!({ "caPolicy": "legacyCapped" })).expect("set");
        assert_eq!(ca_policy(&conn).expect("policy"), CaPolicy::LegacyCapped);
    }
}
