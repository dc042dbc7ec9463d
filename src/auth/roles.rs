use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    ClientAdmin,
    User,
}

impl Role {
    /// Roles allowed to run bulk imports.
    pub fn can_import(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin | Role::ClientAdmin)
    }

    pub fn from_str(role: &str) -> Self {
        match role {
            "super_admin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "client_admin" => Role::ClientAdmin,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::ClientAdmin => "client_admin",
            Role::User => "user",
        }
    }
}
