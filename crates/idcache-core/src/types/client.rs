//! OAuth 2.0 client registration.

use serde::{Deserialize, Serialize};

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types a client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Client Credentials flow.
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
    /// Device Authorization flow (RFC 8628).
    DeviceCode,
    /// Resource Owner Password Credentials flow.
    Password,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::Password => "password",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Registered OAuth/OIDC client.
///
/// Only the configuration that the authorization server reads on hot paths
/// is modelled; secrets stay in the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Human-readable display name.
    pub name: String,

    /// Disabled clients are returned by lookups but must be rejected by
    /// the protocol layer.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Allowed post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Browser origins allowed to call the token endpoints cross-origin.
    #[serde(default)]
    pub allowed_cors_origins: Vec<String>,

    /// Scopes the client may request.
    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    /// Grant types the client may use.
    #[serde(default)]
    pub allowed_grant_types: Vec<GrantType>,

    /// Whether PKCE is mandatory for the authorization code flow.
    #[serde(default = "default_true")]
    pub require_pkce: bool,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: u32,

    /// Device code lifetime in seconds.
    #[serde(default = "default_device_code_lifetime")]
    pub device_code_lifetime: u32,
}

fn default_true() -> bool {
    true
}

fn default_access_token_lifetime() -> u32 {
    3600
}

fn default_device_code_lifetime() -> u32 {
    300
}

impl Client {
    /// Create an enabled client with default lifetimes and no URIs.
    pub fn new(client_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            enabled: true,
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            allowed_cors_origins: Vec::new(),
            allowed_scopes: Vec::new(),
            allowed_grant_types: Vec::new(),
            require_pkce: true,
            access_token_lifetime: default_access_token_lifetime(),
            device_code_lifetime: default_device_code_lifetime(),
        }
    }

    /// Add a redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uris.push(uri.into());
        self
    }

    /// Add an allowed CORS origin.
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_cors_origins.push(origin.into());
        self
    }

    /// Add an allowed scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.allowed_scopes.push(scope.into());
        self
    }

    /// Add an allowed grant type.
    pub fn with_grant_type(mut self, grant_type: GrantType) -> Self {
        self.allowed_grant_types.push(grant_type);
        self
    }
}
