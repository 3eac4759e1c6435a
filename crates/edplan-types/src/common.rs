//! Common types shared across EdPlan crates

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic identifier type
pub type Id = Uuid;

/// Student identifier
pub type StudentId = Id;

/// Assessment document identifier
pub type DocumentId = Id;

/// Template identifier
pub type TemplateId = Id;

/// IEP identifier
pub type IepId = Id;

/// Correlation identifier tagging every trace record of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the authenticated principal, injected by the upstream auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Coordinator,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value.to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "coordinator" => Some(Role::Coordinator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Teachers may create drafts
    pub fn can_create_draft(&self) -> bool {
        matches!(self, Role::Teacher | Role::Coordinator | Role::Admin)
    }

    /// Coordinators may approve
    pub fn can_approve(&self) -> bool {
        matches!(self, Role::Coordinator | Role::Admin)
    }

    /// Admins may archive and reset
    pub fn can_administer(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Authenticated principal attached to every ingress request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Id,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Id, role: Role) -> Self {
        Self { user_id, role }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("Teacher"), Some(Role::Teacher));
        assert_eq!(Role::parse("COORDINATOR"), Some(Role::Coordinator));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("principal"), None);
    }

    #[test]
    fn test_role_policy() {
        assert!(Role::Teacher.can_create_draft());
        assert!(!Role::Teacher.can_approve());
        assert!(Role::Coordinator.can_approve());
        assert!(!Role::Coordinator.can_administer());
        assert!(Role::Admin.can_administer());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
