use crate::commands::CommandError;
use crate::model::{Role, User};
use serde::Serialize;

/// Who is acting and on which term. Passed explicitly into every command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    pub assigned_class: Option<String>,
    pub assigned_subjects: Vec<String>,
    pub term: Option<String>,
}

impl SessionContext {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            role: user.role,
            assigned_class: user.assigned_class.clone(),
            assigned_subjects: user.assigned_subjects.clone(),
            term: None,
        }
    }

    #[cfg(test)]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    pub fn require_term(&self) -> Result<&str, CommandError> {
        match self.term.as_deref() {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => Err(CommandError::no_term()),
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), CommandError> {
        if self.role == role {
            Ok(())
        } else {
            Err(CommandError::forbidden(format!(
                "this action requires the {} role",
                role.as_str()
            )))
        }
    }

    pub fn require_class(&self) -> Result<&str, CommandError> {
        self.assigned_class
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CommandError::bad_params("teacher has no assigned class"))
    }
}
