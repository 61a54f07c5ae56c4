use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, LoaderTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_sequence, order_status_history,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Order lifecycle: listing, ownership-checked reads, customer cancellation,
/// and the admin transition path.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub status_history: Vec<order_status_history::Model>,
}

#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_revenue: Decimal,
    pub orders_by_status: Vec<StatusCount>,
    pub recent_orders: Vec<order::Model>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u64,
}

/// Human-readable order number: `ORD{year}{month}{day}{4-digit daily sequence}`.
pub fn format_order_number(at: DateTime<Utc>, sequence: i32) -> String {
    format!("ORD{}{:04}", at.format("%Y%m%d"), sequence)
}

/// Allocates the next order number for the day via an atomic upsert on the
/// per-day counter row. Safe under concurrent checkouts; call inside the
/// order-creation transaction so an aborted checkout leaves a gap at worst.
pub async fn allocate_order_number<C: ConnectionTrait>(
    conn: &C,
    at: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let day = at.format("%Y%m%d").to_string();
    let row = order_sequence::Entity::insert(order_sequence::ActiveModel {
        day: Set(day),
        counter: Set(1),
    })
    .on_conflict(
        OnConflict::column(order_sequence::Column::Day)
            .value(
                order_sequence::Column::Counter,
                Expr::col(order_sequence::Column::Counter).add(1),
            )
            .to_owned(),
    )
    .exec_with_returning(conn)
    .await?;

    Ok(format_order_number(at, row.counter))
}

/// Applies a status change to an active model: stamps the dedicated date
/// field for terminal states and bumps `updated_at`.
fn apply_status(active: &mut order::ActiveModel, status: OrderStatus, now: DateTime<Utc>) {
    active.status = Set(status);
    match status {
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
        OrderStatus::Refunded => active.refunded_at = Set(Some(now)),
        _ => {}
    }
    active.updated_at = Set(Some(now));
}

/// Appends one history entry. History is append-only; rows are never edited.
pub async fn record_status<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    notes: Option<String>,
    changed_by: Option<Uuid>,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        notes: Set(notes),
        changed_by: Set(changed_by),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderView>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        let views = self.load_views(orders).await?;
        Ok((views, total))
    }

    /// Single order, readable by its owner or any admin.
    #[instrument(skip(self, auth))]
    pub async fn get(&self, order_id: Uuid, auth: &AuthUser) -> Result<OrderView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order".to_string()))?;

        if order.user_id != auth.user_id && !auth.is_admin() {
            return Err(ServiceError::Forbidden(
                "not authorized to access this order".to_string(),
            ));
        }

        let mut views = self.load_views(vec![order]).await?;
        Ok(views.remove(0))
    }

    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        filter: OrderFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderView>, u64), ServiceError> {
        let mut query = order::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        let views = self.load_views(orders).await?;
        Ok((views, total))
    }

    /// Customer cancellation: owner only, and only before fulfilment starts.
    #[instrument(skip(self, auth))]
    pub async fn cancel(&self, order_id: Uuid, auth: &AuthUser) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order".to_string()))?;

        // The admin path skips the ownership check.
        if order.user_id != auth.user_id && !auth.is_admin() {
            return Err(ServiceError::Forbidden(
                "not authorized to cancel this order".to_string(),
            ));
        }
        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidTransition(format!(
                "order in status {} cannot be cancelled",
                order.status
            )));
        }

        let old_status = order.status;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        apply_status(&mut active, OrderStatus::Cancelled, now);
        let order = active.update(&txn).await?;

        record_status(
            &txn,
            order.id,
            OrderStatus::Cancelled,
            Some("Cancelled by customer".to_string()),
            Some(auth.user_id),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: OrderStatus::Cancelled.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled(order.id))
            .await;

        let mut views = self.load_views(vec![order]).await?;
        Ok(views.remove(0))
    }

    /// Admin transition, constrained to the explicit transition table.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<String>,
        admin_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order".to_string()))?;

        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "{} -> {}",
                order.status, new_status
            )));
        }

        let old_status = order.status;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        apply_status(&mut active, new_status, now);
        if new_status == OrderStatus::Refunded {
            active.payment_status = Set(PaymentStatus::Refunded);
        }
        let order = active.update(&txn).await?;

        record_status(&txn, order.id, new_status, notes, Some(admin_id)).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        let mut views = self.load_views(vec![order]).await?;
        Ok(views.remove(0))
    }

    /// Headline order figures for the admin screens.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<OrderStats, ServiceError> {
        let total_orders = order::Entity::find().count(&*self.db).await?;

        let total_revenue: Option<Decimal> = order::Entity::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .select_only()
            .column_as(order::Column::Total.sum(), "revenue")
            .into_tuple()
            .one(&*self.db)
            .await?
            .flatten();

        let mut orders_by_status = Vec::new();
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
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
            .limit(5)
            .all(&*self.db)
            .await?;

        Ok(OrderStats {
            total_orders,
            total_revenue: total_revenue.unwrap_or(Decimal::ZERO),
            orders_by_status,
            recent_orders,
        })
    }

    async fn load_views(&self, orders: Vec<order::Model>) -> Result<Vec<OrderView>, ServiceError> {
        let items = orders.load_many(order_item::Entity, &*self.db).await?;
        let history = orders
            .load_many(order_status_history::Entity, &*self.db)
            .await?;
        Ok(orders
            .into_iter()
            .zip(items)
            .zip(history)
            .map(|((order, items), status_history)| OrderView {
                order,
                items,
                status_history,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::ActiveModelBehavior;

    #[test]
    fn order_number_embeds_day_and_padded_sequence() {
        let at = Utc.with_ymd_and_hms(2025, 8, 3, 12, 30, 0).unwrap();
        assert_eq!(format_order_number(at, 1), "ORD202508030001");
        assert_eq!(format_order_number(at, 42), "ORD202508030042");
        assert_eq!(format_order_number(at, 9999), "ORD202508039999");
    }

    #[test]
    fn terminal_transitions_stamp_their_date_field() {
        let now = Utc::now();
        let mut active = order::ActiveModel::new();
        apply_status(&mut active, OrderStatus::Delivered, now);
        assert_eq!(active.delivered_at, Set(Some(now)));

        let mut active = order::ActiveModel::new();
        apply_status(&mut active, OrderStatus::Cancelled, now);
        assert_eq!(active.cancelled_at, Set(Some(now)));

        let mut active = order::ActiveModel::new();
        apply_status(&mut active, OrderStatus::Refunded, now);
        assert_eq!(active.refunded_at, Set(Some(now)));

        let mut active = order::ActiveModel::new();
        apply_status(&mut active, OrderStatus::Shipped, now);
        assert_eq!(active.delivered_at, sea_orm::ActiveValue::NotSet);
    }
}
