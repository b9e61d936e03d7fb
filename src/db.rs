// src/db.rs
use crate::features::Quota;
use crate::models::{
    ActivePlan, Subscription, SubscriptionPlan, SubscriptionStatus, UsageCounter, User,
};
use crate::store::{ChargeResult, Counter, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, plan_id, status, start_date, end_date, paypal_order_id, created_at";

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, email, full_name, password_hash, role, created_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn create_user(pool: &PgPool, user: &User) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO users (id, email, full_name, password_hash, role, created_at) VALUES ($1, $2, $3, $4, $5, $6)")
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_plans(pool: &PgPool) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT id, name, features, price, duration_days, plan_type FROM subscription_plans WHERE is_active = true ORDER BY price",
    )
    .fetch_all(pool)
    .await
}

pub async fn get_plan(pool: &PgPool, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT id, name, features, price, duration_days, plan_type FROM subscription_plans WHERE id = $1 AND is_active = true",
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await
}

pub async fn create_pending_subscription(
    pool: &PgPool,
    user_id: Uuid,
    plan_id: Uuid,
    paypal_order_id: &str,
) -> Result<Subscription, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(&format!(
        "INSERT INTO subscriptions (id, user_id, plan_id, status, paypal_order_id, created_at) \
         VALUES ($1, $2, $3, 'pending', $4, NOW()) RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(plan_id)
    .bind(paypal_order_id)
    .fetch_one(pool)
    .await
}

pub async fn get_pending_subscription_by_order(
    pool: &PgPool,
    user_id: Uuid,
    paypal_order_id: &str,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
         WHERE user_id = $1 AND paypal_order_id = $2 AND status = 'pending'"
    ))
    .bind(user_id)
    .bind(paypal_order_id)
    .fetch_optional(pool)
    .await
}

/// Активирует оплаченную подписку. Предыдущая активная подписка клуба отменяется
/// в той же транзакции, чтобы активной всегда была только одна.
pub async fn activate_subscription(
    pool: &PgPool,
    subscription_id: Uuid,
    duration_days: i32,
    now: DateTime<Utc>,
) -> Result<Subscription, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let user_id: Uuid = sqlx::query_scalar("SELECT user_id FROM subscriptions WHERE id = $1 FOR UPDATE")
        .bind(subscription_id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE subscriptions SET status = 'cancelled' WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "UPDATE subscriptions SET status = 'active', start_date = $2, end_date = $3 \
         WHERE id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(subscription_id)
    .bind(now)
    .bind(now + Duration::days(i64::from(duration_days)))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(subscription)
}

pub async fn expire_lapsed_subscriptions(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE subscriptions SET status = $1 WHERE status = $2 AND end_date <= NOW()",
    )
    .bind(SubscriptionStatus::Expired.as_str())
    .bind(SubscriptionStatus::Active.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Лимит в виде параметра запроса: -1 для безлимита, `None` если списывать нельзя вовсе.
fn limit_param(limit: Quota) -> Option<i32> {
    if limit.allows(0) {
        Some(i32::from(limit))
    } else {
        None
    }
}

// Условный upsert: счетчик растет только пока не достигнут лимит.
// Пустой результат означает, что лимит исчерпан.
fn counter_upsert_sql(counter: Counter) -> String {
    let column = counter.column();
    format!(
        "INSERT INTO club_usage (club_user_id, month_year, {column}) VALUES ($1, $2, 1) \
         ON CONFLICT (club_user_id, month_year) DO UPDATE \
         SET {column} = club_usage.{column} + 1, updated_at = NOW() \
         WHERE $3 < 0 OR club_usage.{column} < $3 \
         RETURNING {column}"
    )
}

const SYNC_FAVORITES_SQL: &str = "INSERT INTO club_usage (club_user_id, month_year, favorites_count) VALUES ($1, $2, $3) \
     ON CONFLICT (club_user_id, month_year) DO UPDATE \
     SET favorites_count = EXCLUDED.favorites_count, updated_at = NOW()";

async fn increment_counter(
    tx: &mut Transaction<'_, Postgres>,
    club_user_id: Uuid,
    month_year: &str,
    counter: Counter,
    limit: Quota,
) -> Result<ChargeResult, sqlx::Error> {
    let Some(limit) = limit_param(limit) else {
        return Ok(ChargeResult::LimitReached);
    };
    let row = sqlx::query(&counter_upsert_sql(counter))
        .bind(club_user_id)
        .bind(month_year)
        .bind(limit)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(match row {
        Some(row) => ChargeResult::Charged(row.try_get(counter.column())?),
        None => ChargeResult::LimitReached,
    })
}

async fn count_favorites(
    tx: &mut Transaction<'_, Postgres>,
    club_user_id: Uuid,
) -> Result<i32, sqlx::Error> {
    let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM club_favorites WHERE club_user_id = $1")
        .bind(club_user_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(i32::try_from(held).unwrap_or(i32::MAX))
}

// Месячная строка хранит снимок размера избранного на момент последнего изменения
async fn sync_favorites_count(
    tx: &mut Transaction<'_, Postgres>,
    club_user_id: Uuid,
    month_year: &str,
    held: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(SYNC_FAVORITES_SQL)
        .bind(club_user_id)
        .bind(month_year)
        .bind(held)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// Сериализует изменения избранного одного клуба до конца транзакции
async fn lock_favorites(
    tx: &mut Transaction<'_, Postgres>,
    club_user_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
        .bind(club_user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn active_plan(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ActivePlan>, sqlx::Error> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND status = $2 AND end_date > $3 \
             ORDER BY start_date DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(SubscriptionStatus::Active.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(subscription) = subscription else {
            return Ok(None);
        };

        // План может быть снят с продажи, но действующая подписка на него сохраняется
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, name, features, price, duration_days, plan_type FROM subscription_plans WHERE id = $1",
        )
        .bind(subscription.plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan.map(|plan| ActivePlan { subscription, plan }))
    }

    async fn usage(
        &self,
        club_user_id: Uuid,
        month_year: &str,
    ) -> Result<Option<UsageCounter>, sqlx::Error> {
        sqlx::query_as::<_, UsageCounter>(
            "SELECT club_user_id, month_year, player_views, messages_sent, favorites_count FROM club_usage WHERE club_user_id = $1 AND month_year = $2",
        )
        .bind(club_user_id)
        .bind(month_year)
        .fetch_optional(&self.pool)
        .await
    }

    async fn has_viewed(&self, club_user_id: Uuid, player_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM player_views WHERE club_user_id = $1 AND player_id = $2)",
        )
        .bind(club_user_id)
        .bind(player_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn has_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM club_favorites WHERE club_user_id = $1 AND player_id = $2)",
        )
        .bind(club_user_id)
        .bind(player_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn charge_player_view(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO player_views (club_user_id, player_id, viewed_at) VALUES ($1, $2, NOW()) ON CONFLICT DO NOTHING",
        )
        .bind(club_user_id)
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(ChargeResult::Duplicate);
        }

        let result =
            increment_counter(&mut tx, club_user_id, month_year, Counter::PlayerViews, limit)
                .await?;
        match result {
            ChargeResult::Charged(_) => tx.commit().await?,
            // Запись в журнале откатывается вместе с транзакцией
            _ => tx.rollback().await?,
        }
        Ok(result)
    }

    async fn charge_message(
        &self,
        club_user_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let result =
            increment_counter(&mut tx, club_user_id, month_year, Counter::MessagesSent, limit)
                .await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn charge_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
        limit: Quota,
    ) -> Result<ChargeResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        lock_favorites(&mut tx, club_user_id).await?;

        let inserted = sqlx::query(
            "INSERT INTO club_favorites (club_user_id, player_id, created_at) VALUES ($1, $2, NOW()) ON CONFLICT DO NOTHING",
        )
        .bind(club_user_id)
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(ChargeResult::Duplicate);
        }

        // Журнал уже содержит новую запись, поэтому сравниваем число до нее
        let held = count_favorites(&mut tx, club_user_id).await?;
        if !limit.allows(held - 1) {
            tx.rollback().await?;
            return Ok(ChargeResult::LimitReached);
        }

        sync_favorites_count(&mut tx, club_user_id, month_year, held).await?;
        tx.commit().await?;
        Ok(ChargeResult::Charged(held))
    }

    async fn favorite_count(&self, club_user_id: Uuid) -> Result<i32, sqlx::Error> {
        let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM club_favorites WHERE club_user_id = $1")
            .bind(club_user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(i32::try_from(held).unwrap_or(i32::MAX))
    }

    async fn release_favorite(
        &self,
        club_user_id: Uuid,
        player_id: Uuid,
        month_year: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        lock_favorites(&mut tx, club_user_id).await?;

        let deleted = sqlx::query(
            "DELETE FROM club_favorites WHERE club_user_id = $1 AND player_id = $2",
        )
        .bind(club_user_id)
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted > 0 {
            let held = count_favorites(&mut tx, club_user_id).await?;
            sync_favorites_count(&mut tx, club_user_id, month_year, held).await?;
        }

        tx.commit().await?;
        Ok(deleted > 0)
    }
}
