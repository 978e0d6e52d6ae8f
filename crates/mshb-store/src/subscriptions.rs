//! Billing mock: one subscription row per user.

use chrono::Duration;
use rusqlite::{params, OptionalExtension};

use mshb_shared::constants::SUBSCRIPTION_PERIOD_DAYS;
use mshb_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Subscription;
use crate::rows::{now, ts, ts_at, uuid_at};

impl Database {
    pub fn get_subscription(&self, user: UserId) -> Result<Option<Subscription>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT user_id, plan, status, renews_at, updated_at
                 FROM subscriptions WHERE user_id = ?1",
                params![user.to_string()],
                |row| {
                    Ok(Subscription {
                        user_id: uuid_at(row, 0)?,
                        plan: row.get(1)?,
                        status: row.get(2)?,
                        renews_at: ts_at(row, 3)?,
                        updated_at: ts_at(row, 4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Activate `plan` for one billing period starting now.
    pub fn upsert_subscription(&self, user: UserId, plan: &str) -> Result<Subscription> {
        let updated_at = now();
        let sub = Subscription {
            user_id: user,
            plan: plan.to_string(),
            status: "active".into(),
            renews_at: updated_at + Duration::days(SUBSCRIPTION_PERIOD_DAYS),
            updated_at,
        };

        self.conn().execute(
            "INSERT INTO subscriptions (user_id, plan, status, renews_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                renews_at = excluded.renews_at,
                updated_at = excluded.updated_at",
            params![
                user.to_string(),
                sub.plan,
                sub.status,
                ts(&sub.renews_at),
                ts(&sub.updated_at),
            ],
        )?;

        tracing::info!(user = %user.short(), plan, "subscription activated");
        self.emit_update("subscriptions", &sub)?;
        Ok(sub)
    }

    /// Stop renewal. The plan stays usable until `renews_at`.
    pub fn cancel_subscription(&self, user: UserId) -> Result<Subscription> {
        let mut sub = self.get_subscription(user)?.ok_or(StoreError::NotFound)?;
        sub.status = "canceled".into();
        sub.updated_at = now();

        self.conn().execute(
            "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE user_id = ?1",
            params![user.to_string(), sub.status, ts(&sub.updated_at)],
        )?;
        self.emit_update("subscriptions", &sub)?;
        Ok(sub)
    }
}
