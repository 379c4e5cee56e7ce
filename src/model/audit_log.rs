use serde::Serialize;
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}
