use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

const ORDER_COLUMNS: &str =
    "id, client_id, status, installation_date, notes, total, created_at, updated_at";

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Quote,
    Confirmed,
    Installing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Stock is held while the order sits in one of these states
    pub fn holds_stock(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Installing)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub status: OrderStatus,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub total: i64, // centavos
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct OrderWithItems {
    #[serde(flatten)]
    #[ts(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl std::ops::Deref for OrderWithItems {
    type Target = Order;
    fn deref(&self) -> &Self::Target {
        &self.order
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub quantity: i64,
    /// Defaults to the product's current price
    pub unit_price: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateOrder {
    pub client_id: Uuid,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateOrder {
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// An item with its price already resolved
#[derive(Debug, Clone)]
pub struct PricedItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct OrderStatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

impl Order {
    pub async fn find_all(
        pool: &SqlitePool,
        client_id: Option<Uuid>,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE ($1 IS NULL OR client_id = $1)
               AND ($2 IS NULL OR status = $2)
             ORDER BY created_at DESC"
        ))
        .bind(client_id)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_with_items(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<OrderWithItems>, sqlx::Error> {
        let Some(order) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let items = OrderItem::find_by_order_id(pool, id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    /// Insert the order and its items. Callers resolve prices first.
    pub async fn create(
        conn: &mut SqliteConnection,
        data: &CreateOrder,
        items: &[PricedItem],
        order_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "INSERT INTO orders (id, client_id, installation_date, notes) VALUES ($1, $2, $3, $4)",
        )
        .bind(order_id)
        .bind(data.client_id)
        .bind(data.installation_date)
        .bind(&data.notes)
        .execute(&mut *conn)
        .await?;

        Self::write_items(conn, order_id, items).await
    }

    /// Replace all items and recompute the total
    pub async fn write_items(
        conn: &mut SqliteConnection,
        order_id: Uuid,
        items: &[PricedItem],
    ) -> Result<Self, sqlx::Error> {
        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *conn)
            .await?;
        }

        let total: i64 = items.iter().map(|i| i.quantity * i.unit_price).sum();
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET total = $2, updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(total)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn update_details(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateOrder,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET
                installation_date = coalesce($2, installation_date),
                notes = coalesce($3, notes),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(data.installation_date)
        .bind(&data.notes)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_status(
        conn: &mut SqliteConnection,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $2, updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(conn)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<OrderStatusCount>, sqlx::Error> {
        let rows: Vec<(OrderStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM orders GROUP BY status ORDER BY status ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(status, count)| OrderStatusCount { status, count })
            .collect())
    }
}

impl OrderItem {
    pub async fn find_by_order_id(
        pool: &SqlitePool,
        order_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity, unit_price
             FROM order_items WHERE order_id = $1 ORDER BY rowid ASC",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_order_id_in(
        conn: &mut SqliteConnection,
        order_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity, unit_price
             FROM order_items WHERE order_id = $1 ORDER BY rowid ASC",
        )
        .bind(order_id)
        .fetch_all(conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DBService,
        models::{
            client::{Client, CreateClient},
            product::{CreateProduct, Product, ProductCategory},
        },
    };

    #[tokio::test]
    async fn write_items_recomputes_total() {
        let db = DBService::new_in_memory().await.unwrap();
        let client = Client::create(&db.pool, &CreateClient::named("Taller"), Uuid::new_v4())
            .await
            .unwrap();
        let product = Product::create(
            &db.pool,
            &CreateProduct {
                sku: "INV-5K".into(),
                name: "Inversor 5kW".into(),
                description: None,
                category: ProductCategory::Inverter,
                unit_price: 1_800_000,
                sat_product_code: None,
                sat_unit_code: None,
                stock: Some(4),
                min_stock: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        let data = CreateOrder {
            client_id: client.id,
            installation_date: NaiveDate::from_ymd_opt(2026, 11, 3),
            notes: None,
            items: vec![],
        };
        let items = vec![PricedItem {
            product_id: product.id,
            quantity: 2,
            unit_price: 1_750_000,
        }];
        let order = Order::create(&mut conn, &data, &items, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(order.total, 3_500_000);
        assert_eq!(order.status, OrderStatus::Quote);

        let order = Order::write_items(&mut conn, order.id, &[]).await.unwrap();
        assert_eq!(order.total, 0);
        drop(conn);

        let found = Order::find_with_items(&db.pool, order.id).await.unwrap().unwrap();
        assert!(found.items.is_empty());
        assert_eq!(found.installation_date, NaiveDate::from_ymd_opt(2026, 11, 3));
    }
}
