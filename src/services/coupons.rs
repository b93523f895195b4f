use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::coupon::{self, Entity as CouponEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Percentage off carried by every reward coupon.
pub const REWARD_DISCOUNT_PERCENT: i32 = 10;

const REWARD_CODE_PREFIX: &str = "GIFT";
const REWARD_VALIDITY_DAYS: i64 = 30;

/// Coupon Ledger: at most one coupon row per user at any time.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Exact-code, owner-matching, active lookup. Anything else resolves to
    /// None; an invalid code is not an error at checkout time.
    pub async fn find_active(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let found = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::UserId.eq(user_id))
            .filter(coupon::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// The caller's coupon row, active or not.
    pub async fn for_user(&self, user_id: Uuid) -> Result<Option<coupon::Model>, ServiceError> {
        let found = CouponEntity::find()
            .filter(coupon::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Issues a loyalty coupon, replacing any existing row for the user.
    /// Delete-then-insert keyed by owner runs in one transaction so a
    /// concurrent checkout cannot observe two rows.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn issue_reward(&self, user_id: Uuid) -> Result<coupon::Model, ServiceError> {
        let txn = self.db.begin().await?;

        CouponEntity::delete_many()
            .filter(coupon::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(generate_reward_code()),
            discount_percentage: Set(REWARD_DISCOUNT_PERCENT),
            user_id: Set(user_id),
            is_active: Set(true),
            expiration_date: Set(now + Duration::days(REWARD_VALIDITY_DAYS)),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let created = model.insert(&txn).await?;
        txn.commit().await?;

        info!(code = %created.code, "Reward coupon issued");
        self.event_sender
            .send(Event::CouponIssued {
                user_id,
                code: created.code.clone(),
            })
            .await;

        Ok(created)
    }

    /// Marks the user's coupon inactive. Idempotent: a missing or
    /// already-inactive coupon is a no-op, not an error.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn deactivate(&self, user_id: Uuid, code: &str) -> Result<(), ServiceError> {
        let found = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        let Some(found) = found else {
            return Ok(());
        };

        if !found.is_active {
            return Ok(());
        }

        let mut active: coupon::ActiveModel = found.into();
        active.is_active = Set(false);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        info!(code = %code, "Coupon deactivated after redemption");
        self.event_sender
            .send(Event::CouponRedeemed {
                user_id,
                code: code.to_string(),
            })
            .await;

        Ok(())
    }
}

fn generate_reward_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("{REWARD_CODE_PREFIX}{suffix}")
}
