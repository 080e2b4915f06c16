use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Permission scopes attached to an API key.
pub enum ApiKeyScope {
    /// View suites, runs, and results.
    Read,
    /// Create and update suites and cases.
    Write,
    /// Start and cancel evaluation runs.
    Execute,
    /// All permissions.
    Admin,
}

impl ApiKeyScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "execute" => Some(Self::Execute),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// API key metadata as consumed by the engine. Issuance lives outside the core.
pub struct ApiKey {
    pub id: String,
    pub key_prefix: String,
    pub name: String,
    pub project_id: String,
    pub scopes: Vec<ApiKeyScope>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
/// Authenticated request context passed explicitly into every operation.
pub struct RequestContext {
    pub project_id: String,
    pub scopes: Vec<ApiKeyScope>,
    /// Identifier of the authenticated principal (key prefix), when known.
    pub principal: Option<String>,
}

impl RequestContext {
    pub fn new(project_id: impl Into<String>, scopes: Vec<ApiKeyScope>) -> Self {
        Self {
            project_id: project_id.into(),
            scopes,
            principal: None,
        }
    }

    /// Admin implies every other scope.
    pub fn has_scope(&self, scope: ApiKeyScope) -> bool {
        self.scopes
            .iter()
            .any(|held| *held == scope || *held == ApiKeyScope::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiKeyScope, RequestContext};

    #[test]
    fn unit_scope_parse_round_trips() {
        for scope in [
            ApiKeyScope::Read,
            ApiKeyScope::Write,
            ApiKeyScope::Execute,
            ApiKeyScope::Admin,
        ] {
            assert_eq!(ApiKeyScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(ApiKeyScope::parse("root"), None);
    }

    #[test]
    fn unit_admin_scope_implies_all_scopes() {
        let context = RequestContext::new("project-1", vec![ApiKeyScope::Admin]);
        assert!(context.has_scope(ApiKeyScope::Read));
        assert!(context.has_scope(ApiKeyScope::Write));
        assert!(context.has_scope(ApiKeyScope::Execute));

        let reader = RequestContext::new("project-1", vec![ApiKeyScope::Read]);
        assert!(reader.has_scope(ApiKeyScope::Read));
        assert!(!reader.has_scope(ApiKeyScope::Execute));
    }
}
