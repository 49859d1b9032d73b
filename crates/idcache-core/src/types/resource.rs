//! Identity resources, API resources, and API scopes.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A named group of user claims that can be requested as a scope
/// (e.g. `openid`, `profile`, `email`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResource {
    /// Unique name, also used as the scope value.
    pub name: String,
    /// Display name for consent screens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Claims included when this resource is granted.
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl IdentityResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            enabled: true,
            user_claims: Vec::new(),
        }
    }

    pub fn with_claim(mut self, claim: impl Into<String>) -> Self {
        self.user_claims.push(claim.into());
        self
    }
}

/// A protected API and the scopes it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    /// Unique name, used as the token audience.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scopes that grant access to this API.
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl ApiResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            enabled: true,
            scopes: Vec::new(),
            user_claims: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Returns `true` if any of `scope_names` grants access to this API.
    pub fn has_any_scope(&self, scope_names: &[String]) -> bool {
        self.scopes.iter().any(|s| scope_names.contains(s))
    }
}

/// An individual API scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiScope {
    /// Scope value as requested by clients.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the user must explicitly consent to this scope.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl ApiScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            enabled: true,
            required: false,
            user_claims: Vec::new(),
        }
    }
}

/// Every identity resource, API resource, and API scope known to the server.
///
/// This is the result of the "get all resources" query and is cached as a
/// single unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default)]
    pub identity_resources: Vec<IdentityResource>,
    #[serde(default)]
    pub api_resources: Vec<ApiResource>,
    #[serde(default)]
    pub api_scopes: Vec<ApiScope>,
    /// Whether `offline_access` (refresh tokens) may be requested.
    #[serde(default)]
    pub offline_access: bool,
}

impl Resources {
    /// Returns `true` if no resources of any kind are present.
    pub fn is_empty(&self) -> bool {
        self.identity_resources.is_empty()
            && self.api_resources.is_empty()
            && self.api_scopes.is_empty()
    }
}
