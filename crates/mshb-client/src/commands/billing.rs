//! Mock billing: plans are static and checkout activates immediately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use mshb_store::Subscription;

use crate::error::{ClientError, Result};
use crate::state::{signed_in, SharedState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    /// Monthly price in cents.
    pub price_cents: u32,
    pub perks: &'static [&'static str],
}

pub const PLANS: &[Plan] = &[
    Plan {
        id: "basic",
        name: "Basic",
        price_cents: 299,
        perks: &["Custom emoji everywhere", "Bigger uploads"],
    },
    Plan {
        id: "pro",
        name: "Pro",
        price_cents: 999,
        perks: &["Custom emoji everywhere", "Bigger uploads", "Profile banner", "Server boosts"],
    },
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStatus {
    pub premium: bool,
    pub plan: Option<String>,
    pub status: Option<String>,
    pub renews_at: Option<DateTime<Utc>>,
}

pub fn list_plans() -> &'static [Plan] {
    PLANS
}

pub fn checkout(state: &SharedState, plan_id: &str) -> Result<Subscription> {
    let plan = PLANS
        .iter()
        .find(|p| p.id == plan_id)
        .ok_or_else(|| ClientError::Invalid(format!("Unknown plan {plan_id}")))?;

    let (user_id, platform) = signed_in(state)?;
    let sub = platform.db()?.upsert_subscription(user_id, plan.id)?;
    info!(user = %user_id.short(), plan = plan.id, "Checkout completed");
    Ok(sub)
}

/// Stop renewal; the plan stays usable until the end of the period.
pub fn cancel(state: &SharedState) -> Result<Subscription> {
    let (user_id, platform) = signed_in(state)?;
    let sub = platform.db()?.cancel_subscription(user_id)?;
    Ok(sub)
}

pub fn status(state: &SharedState) -> Result<BillingStatus> {
    let (user_id, platform) = signed_in(state)?;
    let sub = platform.db()?.get_subscription(user_id)?;
    let now = Utc::now();
    Ok(match sub {
        Some(sub) => BillingStatus {
            premium: sub.renews_at > now,
            plan: Some(sub.plan),
            status: Some(sub.status),
            renews_at: Some(sub.renews_at),
        },
        None => BillingStatus {
            premium: false,
            plan: None,
            status: None,
            renews_at: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::auth;
    use crate::state::test_support;

    #[tokio::test]
    async fn checkout_then_cancel_keeps_the_period() {
        let (state, _dir) = test_support::state().await;
        auth::sign_up(&state, "pay@example.com", "123456", "payer").await.unwrap();
        assert!(!status(&state).unwrap().premium);
        assert!(checkout(&state, "platinum").is_err());

        let sub = checkout(&state, "pro").unwrap();
        assert_eq!(sub.status, "active");
        assert!(status(&state).unwrap().premium);

        let canceled = cancel(&state).unwrap();
        assert_eq!(canceled.status, "canceled");
        let after = status(&state).unwrap();
        assert!(after.premium);
        assert_eq!(after.plan.as_deref(), Some("pro"));
    }
}
