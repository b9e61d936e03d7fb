// src/usage.rs
use crate::features::{ResolvedLimits, resolve_limits};
use crate::gate;
use crate::models::{ActivePlan, UsageCounter};
use crate::store::{ChargeResult, UsageStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

pub fn current_month_key(clock: &dyn Clock) -> String {
    month_key(clock.now())
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { used: i32 },
    AlreadyCounted,
    QuotaExhausted,
    NoActiveSubscription,
}

impl RecordOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            RecordOutcome::Recorded { .. } | RecordOutcome::AlreadyCounted
        )
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub has_active_subscription: bool,
    pub subscription: Option<ActivePlan>,
    pub limits: ResolvedLimits,
    pub usage: UsageCounter,
    pub month_year: String,
    pub can_view_player: bool,
    pub can_send_message: bool,
    pub can_add_favorite: bool,
}

/// Учет использования квот клуба за текущий месяц.
#[derive(Clone)]
pub struct UsageAccountant {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
}

impl UsageAccountant {
    pub fn new(store: Arc<dyn UsageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn current_month_key(&self) -> String {
        current_month_key(self.clock.as_ref())
    }

    async fn active_plan(&self, club_user_id: Uuid) -> Result<Option<ActivePlan>, UsageError> {
        let now = self.clock.now();
        let active = self.store.active_plan(club_user_id, now).await?;
        Ok(active.filter(|a| a.subscription.is_active_at(now)))
    }

    async fn limits_for(&self, club_user_id: Uuid) -> Result<Option<ResolvedLimits>, UsageError> {
        let active = self.active_plan(club_user_id).await?;
        Ok(active.map(|a| resolve_limits(&a.plan.features)))
    }

    pub async fn entitlements(&self, club_user_id: Uuid) -> Result<Entitlements, UsageError> {
        let month_year = self.current_month_key();
        let subscription = self.active_plan(club_user_id).await?;
        let mut usage = self
            .store
            .usage(club_user_id, &month_year)
            .await?
            .unwrap_or_else(|| UsageCounter::empty(club_user_id, &month_year));
        // Избранное переходит из месяца в месяц, считаем по журналу
        usage.favorites_count = self.store.favorite_count(club_user_id).await?;

        let has_active_subscription = subscription.is_some();
        let limits = subscription
            .as_ref()
            .map(|a| resolve_limits(&a.plan.features))
            .unwrap_or_default();

        Ok(Entitlements {
            has_active_subscription,
            can_view_player: gate::can_view_player(has_active_subscription, &usage, &limits),
            can_send_message: gate::can_send_message(has_active_subscription, &usage, &limits),
            can_add_favorite: gate::can_add_favorite(has_active_subscription, &usage, &limits),
            subscription,
            limits,
            usage,
            month_year,
        })
    }

    pub async fn record_player_view(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
    ) -> Result<RecordOutcome, UsageError> {
        // Повторный просмотр того же игрока бесплатен даже при исчерпанной квоте
        if self.store.has_viewed(club_user_id, player_id).await? {
            return Ok(RecordOutcome::AlreadyCounted);
        }

        let Some(limits) = self.limits_for(club_user_id).await? else {
            return Ok(RecordOutcome::NoActiveSubscription);
        };

        let month_year = self.current_month_key();
        let result = self
            .store
            .charge_player_view(club_user_id, player_id, &month_year, limits.player_views)
            .await?;

        let outcome = outcome_from(result);
        tracing::info!(
            "Player view by club {} of player {} in {}: {:?}",
            club_user_id,
            player_id,
            month_year,
            outcome
        );
        Ok(outcome)
    }

    pub async fn record_message_sent(&self, club_user_id: Uuid) -> Result<RecordOutcome, UsageError> {
        let Some(limits) = self.limits_for(club_user_id).await? else {
            return Ok(RecordOutcome::NoActiveSubscription);
        };

        let month_year = self.current_month_key();
        let result = self
            .store
            .charge_message(club_user_id, &month_year, limits.messages)
            .await?;

        let outcome = outcome_from(result);
        tracing::info!(
            "Message by club {} in {}: {:?}",
            club_user_id,
            month_year,
            outcome
        );
        Ok(outcome)
    }

    pub async fn add_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
    ) -> Result<RecordOutcome, UsageError> {
        if self.store.has_favorite(club_user_id, player_id).await? {
            return Ok(RecordOutcome::AlreadyCounted);
        }

        let Some(limits) = self.limits_for(club_user_id).await? else {
            return Ok(RecordOutcome::NoActiveSubscription);
        };

        let month_year = self.current_month_key();
        let result = self
            .store
            .charge_favorite(club_user_id, player_id, &month_year, limits.favorites)
            .await?;
        Ok(outcome_from(result))
    }

    pub async fn remove_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
    ) -> Result<bool, UsageError> {
        let month_year = self.current_month_key();
        Ok(self
            .store
            .release_favorite(club_user_id, player_id, &month_year)
            .await?)
    }
}

fn outcome_from(result: ChargeResult) -> RecordOutcome {
    match result {
        ChargeResult::Charged(used) => RecordOutcome::Recorded { used },
        ChargeResult::Duplicate => RecordOutcome::AlreadyCounted,
        ChargeResult::LimitReached => RecordOutcome::QuotaExhausted,
    }
}
