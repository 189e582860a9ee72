use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reserved user id the assistant posts under.
pub const ASSISTANT_USER_ID: i64 = 1;

/// Role of an authenticated participant, as asserted by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Agent,
    Technician,
    Admin,
    Ai,
}

impl Role {
    /// Staff see internal messages and may open a ticket with a first reply.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Agent | Role::Technician | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Agent => "agent",
            Role::Technician => "technician",
            Role::Admin => "admin",
            Role::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles() {
        assert!(Role::Agent.is_staff());
        assert!(Role::Technician.is_staff());
        assert!(Role::Admin.is_staff());
        assert!(!Role::Customer.is_staff());
        assert!(!Role::Ai.is_staff());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let role: Role = serde_json::from_str(r#""technician""#).unwrap();
        assert_eq!(role, Role::Technician);
        assert_eq!(serde_json::to_string(&Role::Customer).unwrap(), r#""customer""#);
    }
}
