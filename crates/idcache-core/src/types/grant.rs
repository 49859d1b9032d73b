//! Expiring authorization artifacts: persisted grants and device-flow codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Records that carry an optional expiration timestamp.
pub trait Expiring {
    /// Expiration timestamp; `None` means the record never expires.
    fn expiration(&self) -> Option<OffsetDateTime>;

    /// Returns `true` once `now` is strictly past the expiration.
    fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration().is_some_and(|exp| exp < now)
    }
}

/// A persisted grant (authorization code, refresh token, reference token,
/// or user consent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedGrant {
    /// Hashed handle of the grant.
    pub key: String,
    /// Grant kind, e.g. `authorization_code` or `refresh_token`.
    pub grant_type: String,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub consumed_time: Option<OffsetDateTime>,
    /// Serialized grant payload.
    pub data: String,
}

impl PersistedGrant {
    /// Create a grant created now that expires at `expiration`.
    pub fn new(
        key: impl Into<String>,
        grant_type: impl Into<String>,
        client_id: impl Into<String>,
        expiration: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            key: key.into(),
            grant_type: grant_type.into(),
            subject_id: None,
            session_id: None,
            client_id: client_id.into(),
            creation_time: OffsetDateTime::now_utc(),
            expiration,
            consumed_time: None,
            data: String::new(),
        }
    }
}

impl Expiring for PersistedGrant {
    fn expiration(&self) -> Option<OffsetDateTime> {
        self.expiration
    }
}

/// State of a pending or completed device authorization (RFC 8628).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFlowCode {
    /// Code shown to the user on the secondary device.
    pub user_code: String,
    /// Code polled by the device.
    pub device_code: String,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
    pub data: String,
}

impl DeviceFlowCode {
    /// Create a device code created now that expires at `expiration`.
    pub fn new(
        user_code: impl Into<String>,
        device_code: impl Into<String>,
        client_id: impl Into<String>,
        expiration: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            user_code: user_code.into(),
            device_code: device_code.into(),
            subject_id: None,
            session_id: None,
            client_id: client_id.into(),
            creation_time: OffsetDateTime::now_utc(),
            expiration,
            data: String::new(),
        }
    }
}

impl Expiring for DeviceFlowCode {
    fn expiration(&self) -> Option<OffsetDateTime> {
        self.expiration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_expiration_is_strict() {
        let now = OffsetDateTime::now_utc();
        let grant = PersistedGrant::new("k", "refresh_token", "app1", Some(now));
        assert!(!grant.is_expired_at(now));
        assert!(grant.is_expired_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_no_expiration_never_expires() {
        let code = DeviceFlowCode::new("u", "d", "app1", None);
        assert!(!code.is_expired_at(OffsetDateTime::now_utc() + Duration::days(3650)));
    }
}
