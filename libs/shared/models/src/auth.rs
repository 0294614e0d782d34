use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

impl JwtClaims {
    /// The application role lives in `app_metadata.role`; the top-level `role`
    /// claim is only consulted when it names one of our roles.
    pub fn app_role(&self) -> Option<Role> {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.get("role"))
            .and_then(|role| role.as_str())
            .and_then(Role::parse)
            .or_else(|| self.role.as_deref().and_then(Role::parse))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Guardian,
    Therapist,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "guardian" | "parent" => Some(Role::Guardian),
            "therapist" => Some(Role::Therapist),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Guardian => write!(f, "guardian"),
            Role::Therapist => write!(f, "therapist"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// The authenticated caller, as resolved by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role, email: None }
    }

    pub fn is_therapist(&self) -> bool {
        self.role == Role::Therapist
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Patients and guardians act on behalf of a patient.
    pub fn is_patient_side(&self) -> bool {
        matches!(self.role, Role::Patient | Role::Guardian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(role: Option<&str>, app_metadata: Option<serde_json::Value>) -> JwtClaims {
        JwtClaims {
            sub: Uuid::new_v4().to_string(),
            exp: None,
            email: None,
            role: role.map(str::to_string),
            app_metadata,
            user_metadata: None,
            aud: None,
            iat: None,
        }
    }

    #[test]
    fn app_metadata_role_wins_over_supabase_role() {
        let claims = claims(Some("authenticated"), Some(json!({ "role": "therapist" })));
        assert_eq!(claims.app_role(), Some(Role::Therapist));
    }

    #[test]
    fn falls_back_to_top_level_role() {
        assert_eq!(claims(Some("Guardian"), None).app_role(), Some(Role::Guardian));
        assert_eq!(claims(Some("authenticated"), None).app_role(), None);
    }
}
