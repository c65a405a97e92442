use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    entities::{refund, Order, OrderItem, OrderItemStatus, Refund, RefundStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestRefundInput {
    #[validate(range(min = 1))]
    pub order_item_id: i64,
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

/// Customer-requested, seller-decided refunds of whole order lines.
///
/// A refund starts `pending` and is decided exactly once. The decision is a
/// conditional write on `status = pending`; its affected-row count settles
/// races between concurrent decisions. No money moves here.
#[derive(Clone)]
pub struct RefundService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    window: Duration,
}

impl RefundService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, window: Duration) -> Self {
        Self {
            db,
            event_sender,
            window,
        }
    }

    /// Opens a pending refund for a delivered item bought by the caller.
    ///
    /// Checks run in this order: item exists, item delivered, caller owns the
    /// order, request falls inside the refund window (measured from the item's
    /// last status change), no refund exists yet. The amount is always the full
    /// line: quantity × frozen unit price.
    #[instrument(skip(self, input), fields(customer_id = customer.user_id, order_item_id = input.order_item_id))]
    pub async fn request_refund(
        &self,
        customer: &AuthenticatedUser,
        input: RequestRefundInput,
    ) -> Result<refund::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let (item, order) = match OrderItem::find_by_id(input.order_item_id)
            .find_also_related(Order)
            .one(db)
            .await?
        {
            Some((item, Some(order))) => (item, order),
            _ => {
                return Err(ServiceError::NotFound(format!(
                    "Order item {} not found",
                    input.order_item_id
                )))
            }
        };

        if item.status != OrderItemStatus::Delivered {
            return Err(ServiceError::ItemNotDelivered(format!(
                "Order item {} is {}",
                item.id, item.status
            )));
        }

        if order.user_id != customer.user_id {
            warn!("Customer {} does not own order {}", customer.user_id, order.id);
            return Err(ServiceError::NotOwner(format!(
                "Order item {} was not bought by this customer",
                item.id
            )));
        }

        let now = Utc::now();
        if now - item.updated_at > self.window {
            return Err(ServiceError::RefundWindowExpired(format!(
                "Order item {} was delivered more than {} days ago",
                item.id,
                self.window.num_days()
            )));
        }

        let existing = Refund::find()
            .filter(refund::Column::OrderItemId.eq(item.id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::RefundAlreadyExists(format!(
                "Order item {} already has a refund",
                item.id
            )));
        }

        let created = refund::ActiveModel {
            order_item_id: Set(item.id),
            requester_id: Set(customer.user_id),
            seller_id: Set(item.seller_id),
            amount: Set(item.line_total()),
            reason: Set(input.reason),
            status: Set(RefundStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::RefundAlreadyExists(
                format!("Order item {} already has a refund", item.id),
            ),
            _ => {
                error!("Failed to insert refund for item {}: {}", item.id, e);
                ServiceError::DatabaseError(e)
            }
        })?;

        self.event_sender
            .send_or_log(Event::RefundRequested {
                refund_id: created.id,
                order_item_id: item.id,
            })
            .await;
        info!(refund_id = created.id, amount = %created.amount, "Refund requested");

        Ok(created)
    }

    /// Approves or rejects a pending refund on behalf of its seller.
    #[instrument(skip(self), fields(seller_id = seller.user_id))]
    pub async fn approve_refund(
        &self,
        seller: &AuthenticatedUser,
        refund_id: i64,
        approve: bool,
    ) -> Result<refund::Model, ServiceError> {
        seller.require_seller()?;
        let db = &*self.db;

        let current = Refund::find_by_id(refund_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Refund {} not found", refund_id)))?;

        if current.seller_id != seller.user_id {
            return Err(ServiceError::AccessDenied(format!(
                "Refund {} belongs to another seller",
                refund_id
            )));
        }

        let decision = if approve {
            RefundStatus::Approved
        } else {
            RefundStatus::Rejected
        };

        let now = Utc::now();
        let result = Refund::update_many()
            .col_expr(refund::Column::Status, Expr::value(decision))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.eq(RefundStatus::Pending))
            .exec(db)
            .await
            .map_err(|e: DbErr| {
                error!("Failed to decide refund {}: {}", refund_id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::IllegalStatusTransition(format!(
                "Refund {} is no longer pending",
                refund_id
            )));
        }

        self.event_sender
            .send_or_log(Event::RefundDecided {
                refund_id,
                status: decision,
            })
            .await;
        info!(refund_id, status = %decision, "Refund decided");

        Ok(refund::Model {
            status: decision,
            updated_at: now,
            ..current
        })
    }
}
