use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::AuthenticatedUser,
    entities::{order_item, OrderItem, OrderItemStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Seller-driven moves: pending → processing → delivered, one step at a time.
pub fn is_valid_seller_transition(from: OrderItemStatus, to: OrderItemStatus) -> bool {
    matches!(
        (from, to),
        (OrderItemStatus::Pending, OrderItemStatus::Processing)
            | (OrderItemStatus::Processing, OrderItemStatus::Delivered)
    )
}

/// Buyers may only cancel an item nobody has started working on.
pub fn is_valid_buyer_cancellation(from: OrderItemStatus) -> bool {
    from == OrderItemStatus::Pending
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Advances one order item on behalf of the seller who owns it.
    ///
    /// Fails with `AccessDenied` when the caller is not a seller or is not the
    /// item's seller, and with `InvalidTransition` for anything other than
    /// pending → processing or processing → delivered. The write is
    /// conditional on the status read here, so two sellers' tabs racing on the
    /// same item cannot both apply a move. On success `updated_at` is bumped;
    /// it later anchors the refund window.
    #[instrument(skip(self), fields(seller_id = actor.user_id, item_id = item_id, new_status = %new_status))]
    pub async fn seller_update_order_item_status(
        &self,
        actor: &AuthenticatedUser,
        item_id: i64,
        new_status: OrderItemStatus,
    ) -> Result<order_item::Model, ServiceError> {
        actor.require_seller()?;

        let db = &*self.db;
        let item = OrderItem::find_by_id(item_id)
            .one(db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order item {}: {}", item_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;

        if item.seller_id != actor.user_id {
            warn!("Seller {} does not own order item {}", actor.user_id, item_id);
            return Err(ServiceError::AccessDenied(format!(
                "Order item {} belongs to another seller",
                item_id
            )));
        }

        let old_status = item.status;
        if !is_valid_seller_transition(old_status, new_status) {
            error!(
                "Invalid status transition from {} to {}",
                old_status, new_status
            );
            return Err(ServiceError::InvalidTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let now = Utc::now();
        let result = OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(new_status))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::Id.eq(item_id))
            .filter(order_item::Column::Status.eq(old_status))
            .exec(db)
            .await
            .map_err(|e| {
                error!("Failed to update order item {} status: {}", item_id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            // Someone else moved the item between our read and write.
            let current = OrderItem::find_by_id(item_id)
                .one(db)
                .await?
                .map(|i| i.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            return Err(ServiceError::InvalidTransition {
                from: current,
                to: new_status.to_string(),
            });
        }

        self.event_sender
            .send_or_log(Event::OrderItemStatusChanged {
                item_id,
                from: old_status,
                to: new_status,
            })
            .await;

        info!(
            "Order item {} status updated from '{}' to '{}'",
            item_id, old_status, new_status
        );

        Ok(order_item::Model {
            status: new_status,
            updated_at: now,
            ..item
        })
    }
}
