use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marquee_domain::text::{contains_normalized, normalize_required};

use crate::domain::types::{AggregateRecord, RecordMeta, StoreKind};
use crate::error::StaffServiceError;

/// One row of a role's page-level capability matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub page: String,
    pub page_name: String,
    pub has_access: bool,
    pub route: String,
}

impl Permission {
    pub fn new(page: &str, page_name: &str, route: &str, has_access: bool) -> Self {
        Self {
            page: page.to_owned(),
            page_name: page_name.to_owned(),
            has_access,
            route: route.to_owned(),
        }
    }
}

/// Reject blank pages and pages listed twice in one permission set.
pub fn validate_permissions(permissions: &[Permission]) -> Result<(), StaffServiceError> {
    let mut seen = HashSet::new();
    for p in permissions {
        if p.page.trim().is_empty() {
            return Err(StaffServiceError::InvalidInput(
                "permission page must not be blank".to_owned(),
            ));
        }
        if !seen.insert(p.page.as_str()) {
            return Err(StaffServiceError::InvalidInput(format!(
                "permission page {:?} listed more than once",
                p.page
            )));
        }
    }
    Ok(())
}

/// A role embedded in a tenant's role aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub normalized_name: String,
    pub description: String,
    pub permissions: Vec<Permission>,
    /// Lower is higher precedence.
    pub priority: i32,
    pub is_global: bool,
    pub is_default: bool,
    pub can_delete: bool,
    pub can_edit: bool,
}

/// Fields supplied when creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RoleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl Role {
    pub fn from_draft(draft: RoleDraft, meta: RecordMeta) -> Result<Self, StaffServiceError> {
        let normalized_name = normalize_required("name", &draft.name)?;
        validate_permissions(&draft.permissions)?;
        // Default roles are protected from creation on.
        let editable = !draft.is_default;
        Ok(Self {
            meta,
            name: draft.name.trim().to_owned(),
            normalized_name,
            description: draft.description,
            permissions: draft.permissions,
            priority: draft.priority,
            is_global: draft.is_global,
            is_default: draft.is_default,
            can_delete: editable,
            can_edit: editable,
        })
    }

    pub fn protection(&self) -> RoleProtection {
        if self.is_default {
            RoleProtection::Default
        } else if !self.can_edit {
            RoleProtection::Locked
        } else {
            RoleProtection::Editable
        }
    }

    /// Fields this role's protection class lets a patch touch.
    pub fn editable_fields(&self) -> &'static [RoleField] {
        let protection = self.protection();
        ROLE_FIELD_POLICY
            .iter()
            .find(|(p, _)| *p == protection)
            .map(|(_, fields)| *fields)
            .unwrap_or(PERMISSION_FIELDS)
    }

    /// Apply a whitelist-checked patch. Nothing is modified on error.
    pub fn apply_patch(
        &mut self,
        patch: &RolePatch,
        now: DateTime<Utc>,
    ) -> Result<(), StaffServiceError> {
        let touched = patch.touched_fields();
        if touched.is_empty() {
            return Err(StaffServiceError::InvalidInput(
                "role patch has no fields".to_owned(),
            ));
        }
        let allowed = self.editable_fields();
        let blocked: Vec<&'static str> = touched
            .iter()
            .filter(|f| !allowed.contains(f))
            .map(|f| f.as_str())
            .collect();
        if !blocked.is_empty() {
            return Err(StaffServiceError::ProtectedRecord {
                record_id: self.meta.id,
                blocked_fields: blocked,
                allowed_fields: allowed.iter().map(|f| f.as_str()).collect(),
            });
        }

        let normalized_name = match &patch.name {
            Some(name) => Some(normalize_required("name", name)?),
            None => None,
        };
        if let Some(permissions) = &patch.permissions {
            validate_permissions(permissions)?;
        }

        if let (Some(name), Some(normalized)) = (&patch.name, normalized_name) {
            self.name = name.trim().to_owned();
            self.normalized_name = normalized;
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(permissions) = &patch.permissions {
            self.permissions = permissions.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(is_global) = patch.is_global {
            self.is_global = is_global;
        }
        if let Some(is_active) = patch.is_active {
            self.meta.is_active = is_active;
        }
        self.meta.updated_at = now;
        Ok(())
    }

    pub fn check_deletable(&self) -> Result<(), StaffServiceError> {
        if self.can_delete && !self.is_default {
            return Ok(());
        }
        Err(StaffServiceError::ProtectedRecord {
            record_id: self.meta.id,
            blocked_fields: vec!["delete"],
            allowed_fields: self.editable_fields().iter().map(|f| f.as_str()).collect(),
        })
    }
}

/// Patchable role fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleField {
    Name,
    Description,
    Permissions,
    Priority,
    IsGlobal,
    IsActive,
}

impl RoleField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Permissions => "permissions",
            Self::Priority => "priority",
            Self::IsGlobal => "is_global",
            Self::IsActive => "is_active",
        }
    }
}

/// Protection class of a role, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleProtection {
    /// Auto-created per tenant; `can_edit`/`can_delete` are always false.
    Default,
    /// Not a default role, but `can_edit` was cleared.
    Locked,
    Editable,
}

const PERMISSION_FIELDS: &[RoleField] = &[RoleField::Permissions, RoleField::IsActive];

const ALL_FIELDS: &[RoleField] = &[
    RoleField::Name,
    RoleField::Description,
    RoleField::Permissions,
    RoleField::Priority,
    RoleField::IsGlobal,
    RoleField::IsActive,
];

/// Which fields each protection class may change.
pub const ROLE_FIELD_POLICY: &[(RoleProtection, &[RoleField])] = &[
    (RoleProtection::Default, PERMISSION_FIELDS),
    (RoleProtection::Locked, PERMISSION_FIELDS),
    (RoleProtection::Editable, ALL_FIELDS),
];

/// Partial update of a role. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<Permission>>,
    pub priority: Option<i32>,
    pub is_global: Option<bool>,
    pub is_active: Option<bool>,
}

impl RolePatch {
    pub fn touched_fields(&self) -> Vec<RoleField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(RoleField::Name);
        }
        if self.description.is_some() {
            fields.push(RoleField::Description);
        }
        if self.permissions.is_some() {
            fields.push(RoleField::Permissions);
        }
        if self.priority.is_some() {
            fields.push(RoleField::Priority);
        }
        if self.is_global.is_some() {
            fields.push(RoleField::IsGlobal);
        }
        if self.is_active.is_some() {
            fields.push(RoleField::IsActive);
        }
        fields
    }

    /// True when the patch touches only `permissions` and/or `is_active`.
    pub fn is_permission_only(&self) -> bool {
        self.touched_fields()
            .iter()
            .all(|f| PERMISSION_FIELDS.contains(f))
    }
}

/// Role aggregate counters, recomputed on every save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub total_roles: u64,
    pub active_roles: u64,
    pub inactive_roles: u64,
    pub default_roles: u64,
}

impl AggregateRecord for Role {
    type Summary = RoleSummary;

    const KIND: StoreKind = StoreKind::Role;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn unique_key(&self) -> &str {
        &self.normalized_name
    }

    fn duplicate_error(&self) -> StaffServiceError {
        StaffServiceError::DuplicateName {
            name: self.name.clone(),
        }
    }

    fn matches_search(&self, needle: &str) -> bool {
        self.normalized_name.contains(needle) || contains_normalized(&self.description, needle)
    }

    fn display_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.meta.created_at.cmp(&self.meta.created_at))
            .then_with(|| self.meta.sort_position.cmp(&other.meta.sort_position))
    }

    fn summarize(records: &[Self]) -> RoleSummary {
        let active = records.iter().filter(|r| r.meta.is_active).count() as u64;
        RoleSummary {
            total_roles: records.len() as u64,
            active_roles: active,
            inactive_roles: records.len() as u64 - active,
            default_roles: records.iter().filter(|r| r.is_default).count() as u64,
        }
    }
}

// ── Default roles ────────────────────────────────────────────────────────────

pub const THEATER_ADMIN: &str = "Theater Admin";
pub const KIOSK_SCREEN: &str = "Kiosk Screen";

/// (page, page_name, route)
const THEATER_ADMIN_PAGES: &[(&str, &str, &str)] = &[
    ("dashboard", "Dashboard", "/theater/dashboard"),
    ("products", "Products", "/theater/products"),
    ("categories", "Categories", "/theater/categories"),
    ("product-types", "Product Types", "/theater/product-types"),
    ("stock", "Stock Management", "/theater/stock"),
    ("orders", "Order History", "/theater/orders"),
    ("online-orders", "Online Orders", "/theater/online-orders"),
    ("qr-codes", "QR Codes", "/theater/qr-codes"),
    ("roles", "Role Management", "/theater/roles"),
    ("users", "Staff Users", "/theater/users"),
    ("settings", "Theater Settings", "/theater/settings"),
];

const KIOSK_SCREEN_PAGES: &[(&str, &str, &str)] = &[
    ("kiosk-menu", "Kiosk Menu", "/kiosk/menu"),
    ("kiosk-cart", "Kiosk Cart", "/kiosk/cart"),
    ("kiosk-checkout", "Kiosk Checkout", "/kiosk/checkout"),
    ("kiosk-payment", "Kiosk Payment", "/kiosk/payment"),
    ("kiosk-order-status", "Order Status", "/kiosk/order-status"),
];

fn matrix(pages: &[(&str, &str, &str)]) -> Vec<Permission> {
    pages
        .iter()
        .map(|(page, name, route)| Permission::new(page, name, route, true))
        .collect()
}

/// The protected roles every tenant is bootstrapped with.
pub fn default_role_drafts(tenant_name: &str) -> [RoleDraft; 2] {
    [
        RoleDraft {
            name: THEATER_ADMIN.to_owned(),
            description: format!("Full administrative access for {tenant_name}"),
            permissions: matrix(THEATER_ADMIN_PAGES),
            priority: 1,
            is_global: false,
            is_default: true,
        },
        RoleDraft {
            name: KIOSK_SCREEN.to_owned(),
            description: format!("Self-service kiosk display for {tenant_name}"),
            permissions: matrix(KIOSK_SCREEN_PAGES),
            priority: 10,
            is_global: false,
            is_default: true,
        },
    ]
}
