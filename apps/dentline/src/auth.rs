//! Session-scoped authentication context.
//!
//! The original client kept a module-level persisted auth store; here the
//! caller passes an explicit [`AuthContext`] into the session and the
//! consultation client, so nothing reads ambient global state.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Dentist,
    Admin,
}

impl Role {
    /// The clinician role ends calls for everyone and may submit
    /// consultations; other roles only leave.
    pub fn is_clinician(self) -> bool {
        matches!(self, Role::Dentist)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "dentist" => Ok(Role::Dentist),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub user_name: String,
    pub role: Role,
}

/// Bearer token plus the authenticated user, as handed over by the login
/// flow (an external collaborator).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: String,
    pub user: UserProfile,
}

impl AuthContext {
    pub fn role(&self) -> Role {
        self.user.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_dentist_is_a_clinician() {
        assert!(Role::Dentist.is_clinician());
        assert!(!Role::Patient.is_clinician());
        assert!(!Role::Admin.is_clinician());
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Dentist".parse::<Role>().unwrap(), Role::Dentist);
        assert!("nurse".parse::<Role>().is_err());
    }
}
