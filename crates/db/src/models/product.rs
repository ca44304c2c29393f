use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, sku, name, description, category, unit_price, sat_product_code, sat_unit_code, stock, min_stock, created_at, updated_at";

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "product_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductCategory {
    Panel,
    Inverter,
    Battery,
    Mounting,
    Cable,
    Accessory,
    /// Labour and other non-stock items
    Service,
}

impl ProductCategory {
    pub fn tracks_stock(&self) -> bool {
        !matches!(self, ProductCategory::Service)
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "stock_movement_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockMovementKind {
    Purchase,
    Adjustment,
    OrderReserve,
    OrderRelease,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit_price: i64, // centavos
    pub sat_product_code: String,
    pub sat_unit_code: String,
    pub stock: i64,
    pub min_stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.category.tracks_stock() && self.stock <= self.min_stock
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub kind: StockMovementKind,
    pub quantity: i64, // signed delta
    pub reason: Option<String>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit_price: i64,
    pub sat_product_code: Option<String>,
    pub sat_unit_code: Option<String>,
    pub stock: Option<i64>,
    pub min_stock: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateProduct {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub unit_price: Option<i64>,
    pub sat_product_code: Option<String>,
    pub sat_unit_code: Option<String>,
    pub min_stock: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct StockAdjustment {
    pub kind: StockMovementKind,
    pub quantity: i64,
    pub reason: Option<String>,
}

impl Product {
    pub async fn find_all(
        pool: &SqlitePool,
        category: Option<ProductCategory>,
        low_stock_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE ($1 IS NULL OR category = $1)
               AND ($2 = 0 OR (category != 'service' AND stock <= min_stock))
             ORDER BY name ASC"
        ))
        .bind(category)
        .bind(low_stock_only)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_ids(
        conn: &mut SqliteConnection,
        ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = sqlx::query_as::<_, Product>(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            {
                products.push(product);
            }
        }
        Ok(products)
    }

    pub async fn find_by_sku(pool: &SqlitePool, sku: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateProduct,
        product_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let stock = if data.category.tracks_stock() {
            data.stock.unwrap_or(0)
        } else {
            0
        };
        sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (id, sku, name, description, category, unit_price, sat_product_code, sat_unit_code, stock, min_stock)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product_id)
        .bind(&data.sku)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.category)
        .bind(data.unit_price)
        .bind(data.sat_product_code.as_deref().unwrap_or("01010101"))
        .bind(data.sat_unit_code.as_deref().unwrap_or("H87"))
        .bind(stock)
        .bind(data.min_stock.unwrap_or(0))
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateProduct,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products SET
                sku = coalesce($2, sku),
                name = coalesce($3, name),
                description = coalesce($4, description),
                category = coalesce($5, category),
                unit_price = coalesce($6, unit_price),
                sat_product_code = coalesce($7, sat_product_code),
                sat_unit_code = coalesce($8, sat_unit_code),
                min_stock = coalesce($9, min_stock),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(&data.sku)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.category)
        .bind(data.unit_price)
        .bind(&data.sat_product_code)
        .bind(&data.sat_unit_code)
        .bind(data.min_stock)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Add `delta` to the stock and record the movement. Returns `None` without touching
    /// anything when the product is missing or the stock would drop below zero.
    pub async fn apply_stock_delta(
        conn: &mut SqliteConnection,
        product_id: Uuid,
        delta: i64,
        kind: StockMovementKind,
        reason: Option<&str>,
        order_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let updated = sqlx::query_as::<_, Product>(&format!(
            "UPDATE products
             SET stock = stock + $2, updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND stock + $2 >= 0
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product_id)
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await?;

        if updated.is_some() {
            sqlx::query(
                "INSERT INTO stock_movements (id, product_id, kind, quantity, reason, order_id)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(product_id)
            .bind(kind)
            .bind(delta)
            .bind(reason)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;
        }

        Ok(updated)
    }

    pub async fn count_low_stock(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE category != 'service' AND stock <= min_stock",
        )
        .fetch_one(pool)
        .await
    }
}

impl StockMovement {
    pub async fn find_by_product_id(
        pool: &SqlitePool,
        product_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, StockMovement>(
            "SELECT id, product_id, kind, quantity, reason, order_id, created_at
             FROM stock_movements
             WHERE product_id = $1
             ORDER BY created_at DESC, rowid DESC
             LIMIT $2",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_order_id(
        pool: &SqlitePool,
        order_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, StockMovement>(
            "SELECT id, product_id, kind, quantity, reason, order_id, created_at
             FROM stock_movements
             WHERE order_id = $1
             ORDER BY rowid ASC",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await
    }

    /// Units each product still has reserved for an order, from its recorded
    /// reserve/release movements. Products with nothing outstanding are left out.
    pub async fn held_by_order(
        conn: &mut SqliteConnection,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT product_id, -SUM(quantity) AS held
             FROM stock_movements
             WHERE order_id = $1 AND kind IN ('order_reserve', 'order_release')
             GROUP BY product_id
             HAVING SUM(quantity) < 0
             ORDER BY MIN(rowid)",
        )
        .bind(order_id)
        .fetch_all(conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn panel(sku: &str, stock: i64) -> CreateProduct {
        CreateProduct {
            sku: sku.to_string(),
            name: format!("Panel {sku}"),
            description: None,
            category: ProductCategory::Panel,
            unit_price: 450_000,
            sat_product_code: Some("26111600".into()),
            sat_unit_code: None,
            stock: Some(stock),
            min_stock: Some(2),
        }
    }

    #[tokio::test]
    async fn stock_never_goes_negative() {
        let db = DBService::new_in_memory().await.unwrap();
        let product = Product::create(&db.pool, &panel("PNL-550", 3), Uuid::new_v4())
            .await
            .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        let after = Product::apply_stock_delta(
            &mut conn,
            product.id,
            -2,
            StockMovementKind::Adjustment,
            Some("merma"),
            None,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(after.stock, 1);

        let rejected = Product::apply_stock_delta(
            &mut conn,
            product.id,
            -5,
            StockMovementKind::Adjustment,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(rejected.is_none());
        drop(conn);

        let movements = StockMovement::find_by_product_id(&db.pool, product.id, 10)
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity, -2);
    }

    #[tokio::test]
    async fn low_stock_filter_ignores_services() {
        let db = DBService::new_in_memory().await.unwrap();
        Product::create(&db.pool, &panel("PNL-1", 1), Uuid::new_v4())
            .await
            .unwrap();
        Product::create(&db.pool, &panel("PNL-2", 10), Uuid::new_v4())
            .await
            .unwrap();
        let mut install = panel("SRV-INST", 0);
        install.category = ProductCategory::Service;
        Product::create(&db.pool, &install, Uuid::new_v4())
            .await
            .unwrap();

        let low = Product::find_all(&db.pool, None, true).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku, "PNL-1");
        assert_eq!(Product::count_low_stock(&db.pool).await.unwrap(), 1);

        let services = Product::find_all(&db.pool, Some(ProductCategory::Service), false)
            .await
            .unwrap();
        assert_eq!(services.len(), 1);
    }
}
