use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        cart,
        order::{self, OrderStatus, PaymentStatus},
        product::{self, ProductCategory},
        user::{self, UserRole},
    },
    errors::ServiceError,
    services::orders::StatusCount,
};

const LOW_STOCK_THRESHOLD: i32 = 10;
const RECENT_ORDERS_LIMIT: u64 = 10;
const TOP_PRODUCTS_LIMIT: u64 = 10;
const LOW_STOCK_LIMIT: u64 = 10;
const REVENUE_WINDOW_DAYS: i64 = 30;

/// Admin-facing aggregates and user management.
#[derive(Clone)]
pub struct ReportService {
    db: Arc<DbPool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub revenue: Decimal,
    pub orders: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Dashboard {
    pub total_users: u64,
    pub active_users: u64,
    pub new_users_this_month: u64,
    pub total_products: u64,
    pub total_orders: u64,
    pub new_orders_this_month: u64,
    pub total_revenue: Decimal,
    pub monthly_revenue: Decimal,
    pub weekly_revenue: Decimal,
    pub orders_by_status: Vec<StatusCount>,
    pub recent_orders: Vec<order::Model>,
    pub top_products: Vec<product::Model>,
    pub low_stock_products: Vec<product::Model>,
    pub daily_revenue: Vec<DailyRevenue>,
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct UserFilter {
    /// Substring match against name or email.
    pub search: Option<String>,
    pub role: Option<UserRole>,
}

impl ReportService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<Dashboard, ServiceError> {
        let now = Utc::now();
        let thirty_days_ago = now - Duration::days(REVENUE_WINDOW_DAYS);
        let seven_days_ago = now - Duration::days(7);
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        let total_users = user::Entity::find().count(&*self.db).await?;
        let active_users = user::Entity::find()
            .filter(user::Column::LastLogin.gte(thirty_days_ago))
            .count(&*self.db)
            .await?;
        let new_users_this_month = user::Entity::find()
            .filter(user::Column::CreatedAt.gte(month_start))
            .count(&*self.db)
            .await?;

        let total_products = product::Entity::find().count(&*self.db).await?;
        let total_orders = order::Entity::find().count(&*self.db).await?;
        let new_orders_this_month = order::Entity::find()
            .filter(order::Column::CreatedAt.gte(month_start))
            .count(&*self.db)
            .await?;

        let total_revenue = self.paid_revenue_since(None).await?;
        let monthly_revenue = self.paid_revenue_since(Some(month_start)).await?;
        let weekly_revenue = self.paid_revenue_since(Some(seven_days_ago)).await?;

        let mut orders_by_status = Vec::new();
        for status in OrderStatus::iter() {
            let count = order::Entity::find()
                .filter(order::Column::Status.eq(status))
                .count(&*self.db)
                .await?;
            if count > 0 {
                orders_by_status.push(StatusCount { status, count });
            }
        }

        let recent_orders = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .limit(RECENT_ORDERS_LIMIT)
            .all(&*self.db)
            .await?;

        let top_products = product::Entity::find()
            .filter(product::Column::Sold.gt(0))
            .order_by_desc(product::Column::Sold)
            .limit(TOP_PRODUCTS_LIMIT)
            .all(&*self.db)
            .await?;

        let low_stock_products = product::Entity::find()
            .filter(product::Column::Category.eq(ProductCategory::Merch))
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::Stock.lt(LOW_STOCK_THRESHOLD))
            .order_by_asc(product::Column::Stock)
            .limit(LOW_STOCK_LIMIT)
            .all(&*self.db)
            .await?;

        // Folded in memory so the grouping is portable across backends.
        let window_orders = order::Entity::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .filter(order::Column::CreatedAt.gte(thirty_days_ago))
            .all(&*self.db)
            .await?;
        let daily_revenue = fold_daily_revenue(&window_orders);

        Ok(Dashboard {
            total_users,
            active_users,
            new_users_this_month,
            total_products,
            total_orders,
            new_orders_this_month,
            total_revenue,
            monthly_revenue,
            weekly_revenue,
            orders_by_status,
            recent_orders,
            top_products,
            low_stock_products,
            daily_revenue,
        })
    }

    async fn paid_revenue_since(
        &self,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<Decimal, ServiceError> {
        let mut query = order::Entity::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid));
        if let Some(since) = since {
            query = query.filter(order::Column::CreatedAt.gte(since));
        }
        let sum: Option<Decimal> = query
            .select_only()
            .column_as(order::Column::Total.sum(), "revenue")
            .into_tuple::<Option<Decimal>>()
            .one(&*self.db)
            .await?
            .flatten();
        Ok(sum.unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        filter: UserFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<user::Model>, u64), ServiceError> {
        let mut query = user::Entity::find();
        if let Some(search) = filter.search.filter(|s| !s.trim().is_empty()) {
            let term = search.trim().to_string();
            query = query.filter(
                Condition::any()
                    .add(user::Column::Name.contains(&term))
                    .add(user::Column::Email.contains(&term)),
            );
        }
        if let Some(role) = filter.role {
            query = query.filter(user::Column::Role.eq(role));
        }

        let paginator = query
            .order_by_desc(user::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((users, total))
    }

    /// Admins cannot change their own role; another admin has to do it.
    #[instrument(skip(self))]
    pub async fn update_role(
        &self,
        acting_admin: Uuid,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<user::Model, ServiceError> {
        if acting_admin == user_id {
            return Err(ServiceError::ValidationError(
                "Cannot change your own role".to_string(),
            ));
        }
        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let mut active: user::ActiveModel = user.into();
        active.role = sea_orm::Set(role);
        active.updated_at = sea_orm::Set(Some(Utc::now()));
        Ok(sea_orm::ActiveModelTrait::update(active, &*self.db).await?)
    }

    /// Removes the account and its cart. Orders are kept for bookkeeping.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, acting_admin: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        if acting_admin == user_id {
            return Err(ServiceError::ValidationError(
                "Cannot delete your own account".to_string(),
            ));
        }
        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            cart.delete(&*self.db).await?;
        }
        user.delete(&*self.db).await?;
        Ok(())
    }
}

fn fold_daily_revenue(orders: &[order::Model]) -> Vec<DailyRevenue> {
    let mut by_day: BTreeMap<NaiveDate, (Decimal, u64)> = BTreeMap::new();
    for order in orders {
        let entry = by_day
            .entry(order.created_at.date_naive())
            .or_insert((Decimal::ZERO, 0));
        entry.0 += order.total;
        entry.1 += 1;
    }
    by_day
        .into_iter()
        .map(|(date, (revenue, orders))| DailyRevenue {
            date,
            revenue,
            orders,
        })
        .collect()
}
