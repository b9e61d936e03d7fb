// src/store.rs
use crate::features::Quota;
use crate::models::{ActivePlan, UsageCounter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    PlayerViews,
    MessagesSent,
    FavoritesCount,
}

impl Counter {
    pub fn column(&self) -> &'static str {
        match self {
            Counter::PlayerViews => "player_views",
            Counter::MessagesSent => "messages_sent",
            Counter::FavoritesCount => "favorites_count",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeResult {
    /// Счетчик увеличен, внутри новое значение за месяц
    Charged(i32),
    /// Запись в журнале уже есть, повторно не списываем
    Duplicate,
    LimitReached,
}

/// Хранилище подписок и счетчиков использования.
///
/// Методы `charge_*` атомарны: проверка лимита, запись в журнал и увеличение
/// счетчика выполняются одной операцией на стороне хранилища.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn active_plan(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ActivePlan>, sqlx::Error>;

    async fn usage(
        &self,
        club_user_id: Uuid,
        month_year: &str,
    ) -> Result<Option<UsageCounter>, sqlx::Error>;

    async fn has_viewed(&self, club_user_id: Uuid, player_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn has_favorite(&self, club_user_id: Uuid, player_id: Uuid)
    -> Result<bool, sqlx::Error>;

    async fn charge_player_view(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error>;

    async fn charge_message(
        &self,
        club_user_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error>;

    /// Избранное не сгорает с началом месяца, поэтому лимит сравнивается
    /// с размером журнала `favorites`, а не с месячным счетчиком.
    async fn charge_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error>;

    async fn favorite_count(&self, club_user_id: Uuid) -> Result<i32, sqlx::Error>;

    /// Удаляет игрока из избранного. `false`, если его там не было.
    async fn release_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
    ) -> Result<bool, sqlx::Error>;
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use crate::models::{Subscription, SubscriptionPlan};
    use chrono::Duration;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct State {
        subscriptions: Vec<ActivePlan>,
        usage: HashMap<(Uuid, String), UsageCounter>,
        player_views: HashSet<(Uuid, Uuid)>,
        favorites: HashSet<(Uuid, Uuid)>,
    }

    #[derive(Default)]
    pub struct MemoryUsageStore {
        state: Mutex<State>,
        failing: AtomicBool,
    }

    fn bump(counter: &mut i32, limit: Quota) -> ChargeResult {
        if !limit.allows(*counter) {
            return ChargeResult::LimitReached;
        }
        *counter += 1;
        ChargeResult::Charged(*counter)
    }

    impl State {
        fn row(&mut self, club_user_id: Uuid, month_year: &str) -> &mut UsageCounter {
            self.usage
                .entry((club_user_id, month_year.to_string()))
                .or_insert_with(|| UsageCounter::empty(club_user_id, month_year))
        }

        fn favorite_count(&self, club_user_id: Uuid) -> i32 {
            let held = self
                .favorites
                .iter()
                .filter(|(club, _)| *club == club_user_id)
                .count();
            i32::try_from(held).unwrap_or(i32::MAX)
        }
    }

    impl MemoryUsageStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Активная подписка на 90 дней с указанными возможностями плана.
        pub fn with_plan(self, club_user_id: Uuid, features: &[&str]) -> Self {
            let now = Utc::now();
            let plan = SubscriptionPlan {
                id: Uuid::new_v4(),
                name: "test plan".to_string(),
                features: features.iter().map(|f| f.to_string()).collect(),
                price: 10.0,
                duration_days: 30,
                plan_type: "club".to_string(),
            };
            let subscription = Subscription {
                id: Uuid::new_v4(),
                user_id: club_user_id,
                plan_id: plan.id,
                status: "active".to_string(),
                start_date: Some(now - Duration::days(1)),
                end_date: Some(now + Duration::days(90)),
                paypal_order_id: None,
                created_at: now,
            };
            self.push_subscription(ActivePlan { subscription, plan });
            self
        }

        pub fn push_subscription(&self, active: ActivePlan) {
            self.state.lock().unwrap().subscriptions.push(active);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn counter(&self, club_user_id: Uuid, month_year: &str) -> UsageCounter {
            self.state
                .lock()
                .unwrap()
                .usage
                .get(&(club_user_id, month_year.to_string()))
                .cloned()
                .unwrap_or_else(|| UsageCounter::empty(club_user_id, month_year))
        }

        fn check(&self) -> Result<(), sqlx::Error> {
            if self.failing.load(Ordering::SeqCst) {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl UsageStore for MemoryUsageStore {
        async fn active_plan(
            &self,
            user_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Option<ActivePlan>, sqlx::Error> {
            self.check()?;
            let state = self.state.lock().unwrap();
            Ok(state
                .subscriptions
                .iter()
                .filter(|a| a.subscription.user_id == user_id && a.subscription.is_active_at(now))
                .max_by_key(|a| a.subscription.start_date)
                .cloned())
        }

        async fn usage(
            &self,
            club_user_id: Uuid,
            month_year: &str,
        ) -> Result<Option<UsageCounter>, sqlx::Error> {
            self.check()?;
            let state = self.state.lock().unwrap();
            Ok(state
                .usage
                .get(&(club_user_id, month_year.to_string()))
                .cloned())
        }

        async fn has_viewed(
            &self,
            club_user_id: Uuid,
            player_id: Uuid,
        ) -> Result<bool, sqlx::Error> {
            self.check()?;
            let state = self.state.lock().unwrap();
            Ok(state.player_views.contains(&(club_user_id, player_id)))
        }

        async fn has_favorite(
            &self,
            club_user_id: Uuid,
            player_id: Uuid,
        ) -> Result<bool, sqlx::Error> {
            self.check()?;
            let state = self.state.lock().unwrap();
            Ok(state.favorites.contains(&(club_user_id, player_id)))
        }

        async fn charge_player_view(
            &self,
            club_user_id: Uuid,
            player_id: Uuid,
            month_year: &str,
            limit: Quota,
        ) -> Result<ChargeResult, sqlx::Error> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.player_views.contains(&(club_user_id, player_id)) {
                return Ok(ChargeResult::Duplicate);
            }
            let result = bump(&mut state.row(club_user_id, month_year).player_views, limit);
            if let ChargeResult::Charged(_) = result {
                state.player_views.insert((club_user_id, player_id));
            }
            Ok(result)
        }

        async fn charge_message(
            &self,
            club_user_id: Uuid,
            month_year: &str,
            limit: Quota,
        ) -> Result<ChargeResult, sqlx::Error> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            Ok(bump(&mut state.row(club_user_id, month_year).messages_sent, limit))
        }

        async fn charge_favorite(
            &self,
            club_user_id: Uuid,
            player_id: Uuid,
            month_year: &str,
            limit: Quota,
        ) -> Result<ChargeResult, sqlx::Error> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.favorites.contains(&(club_user_id, player_id)) {
                return Ok(ChargeResult::Duplicate);
            }
            let mut held = state.favorite_count(club_user_id);
            let result = bump(&mut held, limit);
            if let ChargeResult::Charged(held) = result {
                state.favorites.insert((club_user_id, player_id));
                state.row(club_user_id, month_year).favorites_count = held;
            }
            Ok(result)
        }

        async fn favorite_count(&self, club_user_id: Uuid) -> Result<i32, sqlx::Error> {
            self.check()?;
            Ok(self.state.lock().unwrap().favorite_count(club_user_id))
        }

        async fn release_favorite(
            &self,
            club_user_id: Uuid,
            player_id: Uuid,
            month_year: &str,
        ) -> Result<bool, sqlx::Error> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if !state.favorites.remove(&(club_user_id, player_id)) {
                return Ok(false);
            }
            let held = state.favorite_count(club_user_id);
            state.row(club_user_id, month_year).favorites_count = held;
            Ok(true)
        }
    }
}
