use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::pagination::{PageInfo, PageRequest, Sort};

use crate::error::StaffServiceError;

/// Which aggregate store a document belongs to. Role and user documents live
/// in separate tables and never mix records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Role,
    User,
}

impl StoreKind {
    pub fn table(self) -> &'static str {
        match self {
            Self::Role => "role_aggregates",
            Self::User => "user_aggregates",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "role" | "roles" => Some(Self::Role),
            "user" | "users" => Some(Self::User),
            _ => None,
        }
    }

    pub fn record_not_found(self, id: RecordId) -> StaffServiceError {
        match self {
            Self::Role => StaffServiceError::RoleNotFound(id),
            Self::User => StaffServiceError::UserNotFound(id),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields every embedded record carries, flattened into the record's JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sort_position: i64,
    pub is_active: bool,
    /// Run that imported this record; live writes leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_run_id: Option<Uuid>,
}

/// Identity and timestamps to use when appending a record. Live traffic uses
/// [`RecordSeed::fresh`]; the migration runner carries legacy values over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSeed {
    pub id: Option<RecordId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub migration_run_id: Option<Uuid>,
}

impl RecordSeed {
    pub fn fresh() -> Self {
        Self {
            id: None,
            created_at: None,
            updated_at: None,
            is_active: true,
            migration_run_id: None,
        }
    }

    pub fn migrated(
        id: RecordId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        is_active: bool,
    ) -> Self {
        Self {
            id: Some(id),
            created_at: Some(created_at),
            updated_at: Some(updated_at),
            is_active,
            migration_run_id: None,
        }
    }

    pub(crate) fn into_meta(self, now: DateTime<Utc>, sort_position: i64) -> RecordMeta {
        RecordMeta {
            id: self.id.unwrap_or_default(),
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            sort_position,
            is_active: self.is_active,
            migration_run_id: self.migration_run_id,
        }
    }
}

/// Category of a value that must be unique across every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Pin,
    Email,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pin" => Some(Self::Pin),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn duplicate_error(self, value: &str) -> StaffServiceError {
        match self {
            Self::Pin => StaffServiceError::DuplicatePin,
            Self::Email => StaffServiceError::DuplicateEmail {
                email: value.to_owned(),
            },
        }
    }
}

/// A globally unique value held by one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalKey {
    pub kind: KeyKind,
    pub value: String,
}

impl GlobalKey {
    pub fn pin(value: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Pin,
            value: value.into(),
        }
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Email,
            value: value.into(),
        }
    }
}

/// Global key claims to add and release atomically with one document save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChanges {
    pub claim: Vec<(GlobalKey, RecordId)>,
    pub release: Vec<GlobalKey>,
}

impl KeyChanges {
    pub fn between(
        before: &BTreeMap<GlobalKey, RecordId>,
        after: &BTreeMap<GlobalKey, RecordId>,
    ) -> Self {
        let claim = after
            .iter()
            .filter(|(key, owner)| before.get(*key) != Some(*owner))
            .map(|(key, owner)| (key.clone(), *owner))
            .collect();
        let release = before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned()
            .collect();
        Self { claim, release }
    }

    pub fn is_empty(&self) -> bool {
        self.claim.is_empty() && self.release.is_empty()
    }
}

/// One kind of record embedded in a per-tenant aggregate document.
///
/// The generic engine handles identity, ordering, timestamps, summaries,
/// uniqueness and persistence; implementors describe only what differs per
/// kind.
pub trait AggregateRecord:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Summary: Clone
        + fmt::Debug
        + Default
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const KIND: StoreKind;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Normalized key that no two active records of one tenant may share.
    fn unique_key(&self) -> &str;

    fn duplicate_error(&self) -> StaffServiceError;

    /// Values this record holds that must be unique across every tenant.
    fn global_keys(&self) -> Vec<GlobalKey> {
        Vec::new()
    }

    /// `needle` is already normalized.
    fn matches_search(&self, needle: &str) -> bool;

    /// Default display ordering for list operations.
    fn display_order(&self, other: &Self) -> Ordering;

    fn summarize(records: &[Self]) -> Self::Summary;

    fn id(&self) -> RecordId {
        self.meta().id
    }

    fn is_active(&self) -> bool {
        self.meta().is_active
    }
}

/// The single per-tenant container of one record kind.
#[derive(Debug, Clone)]
pub struct AggregateDocument<R: AggregateRecord> {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Optimistic concurrency token, incremented by every successful save.
    pub version: i64,
    pub next_sort_position: i64,
    pub records: Vec<R>,
    pub summary: R::Summary,
    /// Set only when the migration runner created this document.
    pub migration_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What discarding one migration run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscardedRun {
    /// Documents the run created, deleted whole.
    pub documents_deleted: Vec<TenantId>,
    /// Records the run appended to documents that already existed.
    pub records_removed: u64,
}

impl<R: AggregateRecord> AggregateDocument<R> {
    pub fn empty(tenant_id: TenantId, now: DateTime<Utc>, migration_run_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            version: 0,
            next_sort_position: 0,
            records: Vec::new(),
            summary: R::summarize(&[]),
            migration_run_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn find(&self, id: RecordId) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Hand out the next sort position. Positions are never reused, even
    /// after removals shrink the list.
    pub fn take_sort_position(&mut self) -> i64 {
        let position = self.next_sort_position.max(self.records.len() as i64);
        self.next_sort_position = position + 1;
        position
    }

    pub fn refresh_summary(&mut self) {
        self.summary = R::summarize(&self.records);
    }

    /// Reject the document if `record` is active and another active record
    /// holds the same unique key.
    pub fn check_unique(&self, record: &R) -> Result<(), StaffServiceError> {
        if !record.is_active() {
            return Ok(());
        }
        let clash = self.records.iter().any(|other| {
            other.id() != record.id()
                && other.is_active()
                && other.unique_key() == record.unique_key()
        });
        if clash {
            return Err(record.duplicate_error());
        }
        Ok(())
    }

    /// All global keys held by this document's records. Two records of the
    /// same document holding one key is itself a violation.
    pub fn global_keys(&self) -> Result<BTreeMap<GlobalKey, RecordId>, StaffServiceError> {
        let mut keys = BTreeMap::new();
        for record in &self.records {
            for key in record.global_keys() {
                if let Some(owner) = keys.insert(key.clone(), record.id()) {
                    if owner != record.id() {
                        return Err(key.kind.duplicate_error(&key.value));
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// Filters and pagination for list operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: PageRequest,
    /// Case-insensitive substring match.
    pub search: Option<String>,
    pub is_active: Option<bool>,
    /// `Desc` reverses the kind's default display order.
    pub order: Option<Sort>,
}

/// One page of records plus the document-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordPage<R: AggregateRecord> {
    pub records: Vec<R>,
    pub pagination: PageInfo,
    pub summary: R::Summary,
}
