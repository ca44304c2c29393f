//! Order workflow and stock bookkeeping.
//!
//! Confirming an order reserves stock for every item in a single transaction; cancelling a
//! confirmed or installing order gives it back. Service products never touch stock.

use std::collections::HashMap;

use db::{
    DBService,
    models::{
        client::Client,
        order::{CreateOrder, Order, OrderItem, OrderItemInput, OrderStatus, OrderWithItems, PricedItem, UpdateOrder},
        product::{
            CreateProduct, Product, StockAdjustment, StockMovement, StockMovementKind,
            UpdateProduct,
        },
    },
};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("product {0} not found")]
    ProductNotFound(Uuid),
    #[error("client {0} not found")]
    ClientNotFound(Uuid),
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("order is {0}; only quotes can be edited")]
    NotEditable(OrderStatus),
    #[error("order is {0}; only quotes and cancelled orders can be deleted")]
    NotDeletable(OrderStatus),
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        sku: String,
        requested: i64,
        available: i64,
    },
    #[error("product {0} does not track stock")]
    NotStockTracked(Uuid),
    #[error("invalid input: {0}")]
    Validation(String),
}

/// The order status table. Returns the stock effect of the move, or `None` if the move is
/// not allowed.
pub fn transition_effect(from: OrderStatus, to: OrderStatus) -> Option<StockEffect> {
    use OrderStatus::*;
    match (from, to) {
        (Quote, Confirmed) => Some(StockEffect::Reserve),
        (Quote, Cancelled) | (Confirmed, Installing) | (Installing, Completed) => {
            Some(StockEffect::None)
        }
        (Confirmed, Cancelled) | (Installing, Cancelled) => Some(StockEffect::Release),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    Reserve,
    Release,
}

fn validate_items(items: &[OrderItemInput]) -> Result<(), InventoryError> {
    for item in items {
        if item.quantity < 1 {
            return Err(InventoryError::Validation(format!(
                "quantity must be at least 1, got {}",
                item.quantity
            )));
        }
        if item.unit_price.is_some_and(|p| p < 0) {
            return Err(InventoryError::Validation(
                "unit_price cannot be negative".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_product(data: &CreateProduct) -> Result<(), InventoryError> {
    if data.sku.trim().is_empty() {
        return Err(InventoryError::Validation("sku is required".to_string()));
    }
    if data.name.trim().is_empty() {
        return Err(InventoryError::Validation("name is required".to_string()));
    }
    if data.unit_price < 0 {
        return Err(InventoryError::Validation(
            "unit_price cannot be negative".to_string(),
        ));
    }
    if data.stock.is_some_and(|s| s < 0) || data.min_stock.is_some_and(|s| s < 0) {
        return Err(InventoryError::Validation(
            "stock levels cannot be negative".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_product_update(data: &UpdateProduct) -> Result<(), InventoryError> {
    if data.sku.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(InventoryError::Validation("sku cannot be empty".to_string()));
    }
    if data.unit_price.is_some_and(|p| p < 0) || data.min_stock.is_some_and(|s| s < 0) {
        return Err(InventoryError::Validation(
            "prices and stock levels cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Resolve unit prices from the catalogue where the caller left them out
async fn price_items(
    conn: &mut SqliteConnection,
    items: &[OrderItemInput],
) -> Result<Vec<PricedItem>, InventoryError> {
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products: HashMap<Uuid, Product> = Product::find_by_ids(conn, &ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    items
        .iter()
        .map(|item| {
            let product = products
                .get(&item.product_id)
                .ok_or(InventoryError::ProductNotFound(item.product_id))?;
            Ok(PricedItem {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price.unwrap_or(product.unit_price),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct OrderWorkflow {
    db: DBService,
}

impl OrderWorkflow {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn create_order(&self, data: &CreateOrder) -> Result<OrderWithItems, InventoryError> {
        validate_items(&data.items)?;
        if Client::find_by_id(&self.db.pool, data.client_id).await?.is_none() {
            return Err(InventoryError::ClientNotFound(data.client_id));
        }

        let order_id = Uuid::new_v4();
        let mut tx = self.db.pool.begin().await?;
        let priced = price_items(&mut tx, &data.items).await?;
        let order = Order::create(&mut tx, data, &priced, order_id).await?;
        let items = OrderItem::find_by_order_id_in(&mut tx, order_id).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            client_id = %order.client_id,
            items = items.len(),
            total = order.total,
            "Order created"
        );
        Ok(OrderWithItems { order, items })
    }

    /// Replace every item of a quote and recompute its total
    pub async fn replace_items(
        &self,
        order_id: Uuid,
        items: &[OrderItemInput],
    ) -> Result<OrderWithItems, InventoryError> {
        validate_items(items)?;
        let existing = Order::find_by_id(&self.db.pool, order_id)
            .await?
            .ok_or(InventoryError::OrderNotFound(order_id))?;
        if existing.status != OrderStatus::Quote {
            return Err(InventoryError::NotEditable(existing.status));
        }

        let mut tx = self.db.pool.begin().await?;
        let priced = price_items(&mut tx, items).await?;
        let order = Order::write_items(&mut tx, order_id, &priced).await?;
        let items = OrderItem::find_by_order_id_in(&mut tx, order_id).await?;
        tx.commit().await?;

        debug!(order_id = %order_id, items = items.len(), "Order items replaced");
        Ok(OrderWithItems { order, items })
    }

    pub async fn update_details(
        &self,
        order_id: Uuid,
        data: &UpdateOrder,
    ) -> Result<Order, InventoryError> {
        Order::update_details(&self.db.pool, order_id, data)
            .await?
            .ok_or(InventoryError::OrderNotFound(order_id))
    }

    /// Move an order through the status table, reserving or releasing stock as needed.
    /// Either every stock movement lands together with the status change or none does.
    pub async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, InventoryError> {
        let mut tx = self.db.pool.begin().await?;
        let order = sqlx::query_as::<_, (OrderStatus,)>("SELECT status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|(s,)| s)
            .ok_or(InventoryError::OrderNotFound(order_id))?;

        if order == status {
            drop(tx);
            return Order::find_by_id(&self.db.pool, order_id)
                .await?
                .ok_or(InventoryError::OrderNotFound(order_id));
        }

        let effect = transition_effect(order, status).ok_or(InventoryError::InvalidTransition {
            from: order,
            to: status,
        })?;

        match effect {
            StockEffect::Reserve => reserve_stock(&mut tx, order_id).await?,
            StockEffect::Release => release_stock(&mut tx, order_id).await?,
            StockEffect::None => {}
        }

        let updated = Order::set_status(&mut tx, order_id, status).await?;
        tx.commit().await?;

        info!(
            order_id = %order_id,
            from = %order,
            to = %status,
            "Order status changed"
        );
        Ok(updated)
    }

    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), InventoryError> {
        let order = Order::find_by_id(&self.db.pool, order_id)
            .await?
            .ok_or(InventoryError::OrderNotFound(order_id))?;
        if !matches!(order.status, OrderStatus::Quote | OrderStatus::Cancelled) {
            return Err(InventoryError::NotDeletable(order.status));
        }
        Order::delete(&self.db.pool, order_id).await?;
        info!(order_id = %order_id, "Order deleted");
        Ok(())
    }

    /// Manual stock changes. Order reservations only go through [`Self::set_status`].
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        adjustment: &StockAdjustment,
    ) -> Result<Product, InventoryError> {
        match adjustment.kind {
            StockMovementKind::Purchase if adjustment.quantity < 1 => {
                return Err(InventoryError::Validation(
                    "purchases must add at least one unit".to_string(),
                ));
            }
            StockMovementKind::Adjustment if adjustment.quantity == 0 => {
                return Err(InventoryError::Validation(
                    "adjustment quantity cannot be zero".to_string(),
                ));
            }
            StockMovementKind::OrderReserve | StockMovementKind::OrderRelease => {
                return Err(InventoryError::Validation(format!(
                    "{} movements are recorded by the order workflow",
                    adjustment.kind
                )));
            }
            _ => {}
        }

        let product = Product::find_by_id(&self.db.pool, product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        if !product.category.tracks_stock() {
            return Err(InventoryError::NotStockTracked(product_id));
        }

        let mut tx = self.db.pool.begin().await?;
        let updated = Product::apply_stock_delta(
            &mut tx,
            product_id,
            adjustment.quantity,
            adjustment.kind,
            adjustment.reason.as_deref(),
            None,
        )
        .await?
        .ok_or_else(|| InventoryError::InsufficientStock {
            product_id,
            sku: product.sku.clone(),
            requested: -adjustment.quantity,
            available: product.stock,
        })?;
        tx.commit().await?;

        info!(
            product_id = %product_id,
            kind = %adjustment.kind,
            delta = adjustment.quantity,
            stock = updated.stock,
            "Stock adjusted"
        );
        Ok(updated)
    }
}

/// Take stock for every item of an order. Service products are skipped.
async fn reserve_stock(conn: &mut SqliteConnection, order_id: Uuid) -> Result<(), InventoryError> {
    let items = OrderItem::find_by_order_id_in(&mut *conn, order_id).await?;
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products: HashMap<Uuid, Product> = Product::find_by_ids(&mut *conn, &ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let reason = format!("order {order_id}");
    for item in &items {
        let product = products
            .get(&item.product_id)
            .ok_or(InventoryError::ProductNotFound(item.product_id))?;
        if !product.category.tracks_stock() {
            continue;
        }
        let applied = Product::apply_stock_delta(
            &mut *conn,
            item.product_id,
            -item.quantity,
            StockMovementKind::OrderReserve,
            Some(&reason),
            Some(order_id),
        )
        .await?;
        if applied.is_none() {
            // re-read for the error; earlier items of the same product may have consumed some
            let available = Product::find_by_ids(&mut *conn, &[item.product_id])
                .await?
                .first()
                .map(|p| p.stock)
                .unwrap_or(0);
            return Err(InventoryError::InsufficientStock {
                product_id: item.product_id,
                sku: product.sku.clone(),
                requested: item.quantity,
                available,
            });
        }
    }
    Ok(())
}

/// Give back exactly what the order's movements say it holds, whatever the product's
/// category is now.
async fn release_stock(conn: &mut SqliteConnection, order_id: Uuid) -> Result<(), InventoryError> {
    let held = StockMovement::held_by_order(&mut *conn, order_id).await?;
    let reason = format!("order {order_id}");
    for (product_id, quantity) in held {
        Product::apply_stock_delta(
            &mut *conn,
            product_id,
            quantity,
            StockMovementKind::OrderRelease,
            Some(&reason),
            Some(order_id),
        )
        .await?
        .ok_or(InventoryError::ProductNotFound(product_id))?;
    }
    Ok(())
}
