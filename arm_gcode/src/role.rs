use serde::{Deserialize, Serialize};

/// Privilege level of the caller on whose behalf an operation runs.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[serde(rename = "op")]
    Operator,
    Viewer,
    Unknown,
}

impl Role {
    /// Parses the stored role name. Anything unrecognised is `Unknown`.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "admin" => Role::Admin,
            "op" => Role::Operator,
            "viewer" => Role::Viewer,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "op",
            Role::Viewer => "viewer",
            Role::Unknown => "unknown",
        }
    }

    /// Admins and operators may drive the arm.
    pub fn can_operate(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
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
    fn test_parse_roles() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("op"), Role::Operator);
        assert_eq!(Role::parse("viewer"), Role::Viewer);
        assert_eq!(Role::parse("root"), Role::Unknown);
        assert!(Role::Operator.can_operate());
        assert!(!Role::Viewer.can_operate());
    }
}
