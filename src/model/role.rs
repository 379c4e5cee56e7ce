use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Approver,
    User,
}

impl Role {
    /// Approvers may move records through approval workflows; admins may do everything.
    pub fn can_approve(&self) -> bool {
        matches!(self, Role::Admin | Role::Approver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_stored_role_names() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("approver").unwrap(), Role::Approver);
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert!(Role::from_str("root").is_err());
    }

    #[test]
    fn only_admin_and_approver_can_approve() {
        assert!(Role::Admin.can_approve());
        assert!(Role::Approver.can_approve());
        assert!(!Role::User.can_approve());
    }
}
