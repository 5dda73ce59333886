//! sea-orm entities for the staff service tables accessed through typed
//! queries. The aggregate tables themselves (`role_aggregates`,
//! `user_aggregates`) are addressed with table-parameterised statements and
//! have no entity here.

pub mod aggregate_global_keys;
pub mod legacy_roles;
pub mod legacy_users;
pub mod migration_backups;
pub mod tenants;
