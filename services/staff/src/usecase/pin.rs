#![allow(async_fn_in_trait)]

use tracing::{debug, warn};

use crate::domain::user::PIN_SPACE;
use crate::error::StaffServiceError;

/// Yields PIN candidates. Candidates need not be unique.
pub trait PinSource: Send + Sync {
    fn candidate(&self) -> String;
}

/// Uniformly random 4-digit candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPin;

impl PinSource for RandomPin {
    fn candidate(&self) -> String {
        use rand::RngExt;
        format!("{:04}", rand::rng().random_range(0..PIN_SPACE))
    }
}

/// Answers whether a PIN is already held by any user in any tenant.
pub trait PinLedger {
    async fn is_claimed(&self, pin: &str) -> Result<bool, StaffServiceError>;
}

/// Bounded-retry PIN issuance.
///
/// Issuing only checks the ledger; nothing is reserved. The caller's save
/// re-validates the claim and reports `DuplicatePin` if another writer took
/// the PIN in between.
#[derive(Debug, Clone)]
pub struct PinIssuer<S> {
    pub source: S,
    pub max_attempts: u32,
}

impl<S: PinSource> PinIssuer<S> {
    pub async fn issue<L: PinLedger>(&self, ledger: &L) -> Result<String, StaffServiceError> {
        for attempt in 1..=self.max_attempts {
            let pin = self.source.candidate();
            if !ledger.is_claimed(&pin).await? {
                return Ok(pin);
            }
            debug!(attempt, "pin candidate already claimed");
        }
        warn!(attempts = self.max_attempts, "pin space exhausted");
        Err(StaffServiceError::PinSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}
