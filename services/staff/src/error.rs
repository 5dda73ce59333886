use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::text::BlankKey;

/// Staff service domain error variants.
#[derive(Debug, thiserror::Error)]
pub enum StaffServiceError {
    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),
    #[error("no aggregate document for tenant {0}")]
    AggregateNotFound(TenantId),
    #[error("role {0} not found")]
    RoleNotFound(RecordId),
    #[error("user {0} not found")]
    UserNotFound(RecordId),
    #[error("an active role named {name:?} already exists")]
    DuplicateName { name: String },
    #[error("an active user named {username:?} already exists")]
    DuplicateUsername { username: String },
    #[error("email {email:?} is already in use")]
    DuplicateEmail { email: String },
    #[error("pin is already in use")]
    DuplicatePin,
    #[error(
        "record {record_id} is protected: blocked fields [{}]; allowed fields [{}]",
        .blocked_fields.join(", "),
        .allowed_fields.join(", ")
    )]
    ProtectedRecord {
        record_id: RecordId,
        blocked_fields: Vec<&'static str>,
        allowed_fields: Vec<&'static str>,
    },
    #[error("no unused pin found after {attempts} attempts")]
    PinSpaceExhausted { attempts: u32 },
    #[error("aggregate document for tenant {tenant_id} was modified concurrently")]
    PersistenceConflict { tenant_id: TenantId },
    #[error("backup failed: {reason}")]
    BackupFailure { reason: String },
    #[error("conversion failed: {reason}")]
    ConversionFailure { reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl StaffServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::AggregateNotFound(_) => "AGGREGATE_NOT_FOUND",
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::DuplicateUsername { .. } => "DUPLICATE_USERNAME",
            Self::DuplicateEmail { .. } => "DUPLICATE_EMAIL",
            Self::DuplicatePin => "DUPLICATE_PIN",
            Self::ProtectedRecord { .. } => "PROTECTED_RECORD",
            Self::PinSpaceExhausted { .. } => "PIN_SPACE_EXHAUSTED",
            Self::PersistenceConflict { .. } => "PERSISTENCE_CONFLICT",
            Self::BackupFailure { .. } => "BACKUP_FAILURE",
            Self::ConversionFailure { .. } => "CONVERSION_FAILURE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Errors a caller may resolve by simply retrying the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. } | Self::DuplicatePin)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_)
                | Self::AggregateNotFound(_)
                | Self::RoleNotFound(_)
                | Self::UserNotFound(_)
        )
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::ProtectedRecord {
                record_id,
                blocked_fields,
                allowed_fields,
            } => Some(serde_json::json!({
                "record_id": record_id,
                "blocked_fields": blocked_fields,
                "allowed_fields": allowed_fields,
            })),
            Self::PinSpaceExhausted { attempts } => Some(serde_json::json!({
                "attempts": attempts,
            })),
            _ => None,
        }
    }
}

impl From<BlankKey> for StaffServiceError {
    fn from(e: BlankKey) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl IntoResponse for StaffServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::TenantNotFound(_)
            | Self::AggregateNotFound(_)
            | Self::RoleNotFound(_)
            | Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateName { .. }
            | Self::DuplicateUsername { .. }
            | Self::DuplicateEmail { .. }
            | Self::DuplicatePin
            | Self::PersistenceConflict { .. } => StatusCode::CONFLICT,
            Self::ProtectedRecord { .. } => StatusCode::FORBIDDEN,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::PinSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::BackupFailure { .. } | Self::ConversionFailure { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }
        (status, axum::Json(body)).into_response()
    }
}
