//! Record model and database scopes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RecordId, Value};

/// Field values of a record, keyed by field name
pub type Data = BTreeMap<String, Value>;

/// Partition of record storage a database handle operates on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseScope {
    /// Shared by every user
    Public,
    /// Owned by a single user
    Private(String),
}

impl DatabaseScope {
    /// Value stored in the `_database_id` column
    pub fn database_id(&self) -> &str {
        match self {
            DatabaseScope::Public => "",
            DatabaseScope::Private(user_id) => user_id,
        }
    }
}

/// Level of access granted by an ACL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

/// A single access rule, granting a level to a user or to a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub level: AccessLevel,
}

impl AclEntry {
    pub fn for_user(user_id: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            relation: None,
            user_id: Some(user_id.into()),
            level,
        }
    }

    pub fn for_relation(relation: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            relation: Some(relation.into()),
            user_id: None,
            level,
        }
    }

    /// Entry granting `level` to everyone
    pub fn public(level: AccessLevel) -> Self {
        Self::for_relation("public", level)
    }
}

/// A typed record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    /// Assigned from the scope on save; ignored on input
    pub database_id: String,
    pub owner_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub creator_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updater_id: String,
    /// `None` means public read, owner write
    pub acl: Option<Vec<AclEntry>>,
    pub data: Data,
    /// Server-computed values, never persisted
    pub transient: Data,
}

impl Record {
    pub fn new(id: RecordId, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            database_id: String::new(),
            owner_id: owner_id.into(),
            created_at: None,
            creator_id: String::new(),
            updated_at: None,
            updater_id: String::new(),
            acl: None,
            data: Data::new(),
            transient: Data::new(),
        }
    }

    /// Set a data field, builder style
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    pub fn with_acl(mut self, acl: Vec<AclEntry>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(field.into(), value.into());
    }

    /// Whether `user_id` holds `level` on this record
    ///
    /// The owner holds every level. Without an ACL everyone may read. Relation
    /// entries other than `public` need relation lookups and are not matched here.
    pub fn accessible(&self, user_id: &str, level: AccessLevel) -> bool {
        if !user_id.is_empty() && user_id == self.owner_id {
            return true;
        }

        let Some(acl) = &self.acl else {
            return level == AccessLevel::Read;
        };

        acl.iter().any(|entry| {
            let applies = entry.user_id.as_deref() == Some(user_id)
                || entry.relation.as_deref() == Some("public");
            applies && entry.level >= level
        })
    }
}

/// Kind of committed change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEventKind {
    Created,
    Updated,
    Deleted,
}

/// A committed record change, delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEvent {
    pub record: Record,
    pub kind: RecordEventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Record {
        Record::new(RecordId::new("note", "1"), "owner")
    }

    #[test]
    fn test_scope_database_id() {
        assert_eq!(DatabaseScope::Public.database_id(), "");
        assert_eq!(DatabaseScope::Private("alice".into()).database_id(), "alice");
    }

    #[test]
    fn test_builder_sets_data() {
        let record = note().with("content", "hello").with("noteOrder", 1);
        assert_eq!(record.get("content"), Some(&Value::String("hello".into())));
        assert_eq!(record.get("noteOrder"), Some(&Value::Number(1.0)));
        assert!(record.transient.is_empty());
    }

    // =========================================================================
    // ACL Tests
    // =========================================================================

    #[test]
    fn test_owner_always_accessible() {
        let record = note().with_acl(vec![]);
        assert!(record.accessible("owner", AccessLevel::Write));
    }

    #[test]
    fn test_absent_acl_is_public_read_only() {
        let record = note();
        assert!(record.accessible("stranger", AccessLevel::Read));
        assert!(!record.accessible("stranger", AccessLevel::Write));
    }

    #[test]
    fn test_user_entry_levels() {
        let record = note().with_acl(vec![AclEntry::for_user("bob", AccessLevel::Read)]);
        assert!(record.accessible("bob", AccessLevel::Read));
        assert!(!record.accessible("bob", AccessLevel::Write));
        assert!(!record.accessible("carol", AccessLevel::Read));
    }

    #[test]
    fn test_public_entry() {
        let record = note().with_acl(vec![AclEntry::public(AccessLevel::Write)]);
        assert!(record.accessible("anyone", AccessLevel::Write));
    }

    #[test]
    fn test_acl_entry_serialization() {
        let json = serde_json::to_value(AclEntry::for_relation("friend", AccessLevel::Read)).unwrap();
        assert_eq!(json, serde_json::json!({"relation": "friend", "level": "read"}));
    }
}
