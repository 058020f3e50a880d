//! Registry login credential (spec §3 "Credential", §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Invariant: a credential is eligible iff `active && failures < 3`
/// (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub username: String,
    pub secret: String,
    pub active: bool,
    pub failures: u32,
    pub last_used: Option<DateTime<Utc>>,
}

/// Number of consecutive login failures after which a credential is no
/// longer eligible (spec §3, §4.3). Not deleted, only excluded from selection.
pub const MAX_FAILURES: u32 = 3;

impl Credential {
    pub fn new(id: impl Into<String>, username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            secret: secret.into(),
            active: true,
            failures: 0,
            last_used: None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.active && self.failures < MAX_FAILURES
    }
}
