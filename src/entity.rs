//! Auxiliary entities: users, devices, relations and asset metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Provider-qualified principal id (e.g. `com.example:johndoe`) mapped to provider data
pub type AuthInfo = BTreeMap<String, serde_json::Value>;

/// A registered user
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserInfo {
    /// Generated on create when empty
    pub id: String,
    pub username: String,
    pub email: String,
    /// Opaque credential bytes; hashing is the caller's concern
    pub hashed_password: Vec<u8>,
    pub auth: AuthInfo,
}

impl UserInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_password(mut self, hashed: impl Into<Vec<u8>>) -> Self {
        self.hashed_password = hashed.into();
        self
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>, data: serde_json::Value) -> Self {
        self.auth.insert(principal_id.into(), data);
        self
    }
}

/// A push-notification registration
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    /// Platform, e.g. `ios` or `android`
    pub device_type: String,
    pub token: Option<String>,
    pub user_id: String,
    pub last_registered_at: Option<DateTime<Utc>>,
}

/// Asset metadata; the blob itself is stored elsewhere
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub name: String,
    pub content_type: String,
    pub size: i64,
}

impl Asset {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size,
        }
    }
}

/// Which edges of a relation to follow from a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    /// Users the given user points at
    Outward,
    /// Users pointing at the given user
    Inward,
    /// Users connected in both directions
    Mutual,
}

/// Limit/offset window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Pagination {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}
