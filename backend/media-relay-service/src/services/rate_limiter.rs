use crate::metrics;
use crate::services::calendar::QuotaCalendar;
use crate::services::usage_counter::UsageCounterStore;
use media_core::IdentityTier;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Admission decision for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { used: u64, limit: u32 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Resolves identities to quota tiers from configuration
#[derive(Debug, Clone, Default)]
pub struct TierDirectory {
    unrestricted: HashSet<String>,
}

impl TierDirectory {
    pub fn new<I, S>(unrestricted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unrestricted: unrestricted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tier_of(&self, identity: &str) -> IdentityTier {
        if self.unrestricted.contains(identity) {
            IdentityTier::Unrestricted
        } else {
            IdentityTier::Standard
        }
    }
}

/// Daily quota admission.
///
/// Only peeks at the counter. Charging happens in the worker after a confirmed delivery.
#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn UsageCounterStore>,
    calendar: QuotaCalendar,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn UsageCounterStore>, calendar: QuotaCalendar) -> Self {
        Self { counters, calendar }
    }

    pub async fn admit(&self, identity: &str, tier: IdentityTier, limit: u32) -> Admission {
        let admission = match tier {
            IdentityTier::Unrestricted => Admission::Allowed,
            IdentityTier::Standard => {
                let day = self.calendar.today();
                match self.counters.get(identity, day).await {
                    Ok(used) if used < u64::from(limit) => Admission::Allowed,
                    Ok(used) => Admission::Denied { used, limit },
                    Err(e) => {
                        // fail open
                        warn!(identity, error = %e, "Usage counter unavailable, admitting");
                        Admission::Allowed
                    }
                }
            }
        };

        debug!(identity, tier = tier.as_str(), ?admission, "Admission decided");
        metrics::record_admission(admission.is_allowed(), tier.as_str());
        admission
    }
}
