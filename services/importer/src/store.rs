//! Persistence for orders and follow-up requests
//!
//! `OrderStore` is the seam between the reconciliation engine and the database:
//! - `PgStore` talks to PostgreSQL through sqlx
//! - `MemoryStore` backs dry runs and tests

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::model::{ActiveOrder, NewFollowUpRequest, NewOrder, OrderStatus, OrderUpdate};

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Map of `pv_code -> order id` for the keys that already exist
    async fn find_order_ids(&self, pv_codes: &[String]) -> Result<HashMap<String, Uuid>>;

    async fn update_order(&self, order_id: Uuid, update: &OrderUpdate) -> Result<()>;

    /// Create an order and, when given, its first follow-up request atomically
    async fn create_order(
        &self,
        order: &NewOrder,
        request: Option<&NewFollowUpRequest>,
    ) -> Result<Uuid>;

    /// Orders neither invoiced nor already ATRASADO/CONCLUIDO, with the forecast of
    /// their most recent request
    async fn active_orders(&self) -> Result<Vec<ActiveOrder>>;

    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> Result<()>;

    /// Delete comments, requests and the order itself. `false` when the key is unknown.
    async fn delete_order_cascade(&self, pv_code: &str) -> Result<bool>;
}

// =============================================================================
// POSTGRES
// =============================================================================

const INSERT_DEFAULT_REQUESTER: &str = r#"
    INSERT INTO users (id, name, email, role)
    VALUES ($1, 'Vendedor Padrão', 'vendas@demo.com', 'VENDAS')
    ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
    RETURNING id
"#;

pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveOrderRow {
    id: Uuid,
    pv_code: String,
    status: String,
    forecast_date: Option<NaiveDate>,
}

impl PgStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        let db_url = config.require_db_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// First VENDAS user, created as the default salesperson when none exists
    pub async fn ensure_default_requester(&self) -> Result<Uuid> {
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE role = 'VENDAS' ORDER BY created_at LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        if let Some((id,)) = existing {
            return Ok(id);
        }

        // The demo address may already belong to a user with another role
        let (id,): (Uuid,) = sqlx::query_as(INSERT_DEFAULT_REQUESTER)
            .bind(Uuid::new_v4())
            .fetch_one(&self.pool)
            .await
            .context("Failed to create default requester")?;

        tracing::info!(%id, "Default requester resolved");
        Ok(id)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn find_order_ids(&self, pv_codes: &[String]) -> Result<HashMap<String, Uuid>> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, pv_code FROM orders WHERE pv_code = ANY($1)")
                .bind(pv_codes)
                .fetch_all(&self.pool)
                .await
                .context("Failed to load existing orders")?;

        Ok(rows.into_iter().map(|(id, code)| (code, id)).collect())
    }

    async fn update_order(&self, order_id: Uuid, update: &OrderUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET client_name = $2, salesperson = $3, status = $4, invoiced = $5,
                invoiced_date = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(&update.client_name)
        .bind(&update.salesperson)
        .bind(update.status.as_str())
        .bind(update.invoiced)
        .bind(update.invoiced_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_order(
        &self,
        order: &NewOrder,
        request: Option<&NewFollowUpRequest>,
    ) -> Result<Uuid> {
        let order_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, pv_code, client_name, salesperson, order_date, status, invoiced, invoiced_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order_id)
        .bind(&order.pv_code)
        .bind(&order.client_name)
        .bind(&order.salesperson)
        .bind(order.order_date)
        .bind(order.status.as_str())
        .bind(order.invoiced)
        .bind(order.invoiced_date)
        .execute(&mut *tx)
        .await?;

        if let Some(req) = request {
            sqlx::query(
                r#"
                INSERT INTO follow_up_requests
                (id, order_id, requester_id, requested_dept, request_date, response_date, forecast_date, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(req.requester_id)
            .bind(&req.requested_dept)
            .bind(req.request_date)
            .bind(req.response_date)
            .bind(req.forecast_date)
            .bind(&req.notes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order_id)
    }

    async fn active_orders(&self) -> Result<Vec<ActiveOrder>> {
        let rows: Vec<ActiveOrderRow> = sqlx::query_as(
            r#"
            SELECT o.id, o.pv_code, o.status, r.forecast_date
            FROM orders o
            LEFT JOIN LATERAL (
                SELECT forecast_date FROM follow_up_requests
                WHERE order_id = o.id
                ORDER BY request_date DESC, created_at DESC
                LIMIT 1
            ) r ON true
            WHERE o.invoiced = false AND o.status NOT IN ('ATRASADO', 'CONCLUIDO')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load active orders")?;

        rows.into_iter()
            .map(|row| {
                Ok(ActiveOrder {
                    id: row.id,
                    status: row.status.parse()?,
                    pv_code: row.pv_code,
                    latest_forecast: row.forecast_date,
                })
            })
            .collect()
    }

    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_order_cascade(&self, pv_code: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE pv_code = $1")
            .bind(pv_code)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((order_id,)) = existing else {
            return Ok(false);
        };

        sqlx::query(
            "DELETE FROM comments WHERE request_id IN (SELECT id FROM follow_up_requests WHERE order_id = $1)",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM follow_up_requests WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub id: Uuid,
    pub pv_code: String,
    pub client_name: String,
    pub salesperson: String,
    pub order_date: NaiveDate,
    pub invoiced: bool,
    pub invoiced_date: Option<NaiveDate>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub request: NewFollowUpRequest,
}

#[derive(Debug, Clone, PartialEq)]
struct StoredComment {
    request_id: Uuid,
}

#[derive(Debug, Default)]
struct MemoryState {
    orders: Vec<StoredOrder>,
    requests: Vec<StoredRequest>,
    comments: Vec<StoredComment>,
    /// Keys whose writes are rejected, for exercising partial failures
    #[cfg(test)]
    failing_keys: Vec<String>,
}

/// Store kept in process memory; insertion order is preserved
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Reject every write touching one of `keys`
    pub fn failing_on(keys: &[&str]) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                failing_keys: keys.iter().map(|k| k.to_string()).collect(),
                ..MemoryState::default()
            }),
        }
    }

    pub async fn orders(&self) -> Vec<StoredOrder> {
        self.state.lock().await.orders.clone()
    }

    pub async fn order(&self, pv_code: &str) -> Option<StoredOrder> {
        let state = self.state.lock().await;
        state.orders.iter().find(|o| o.pv_code == pv_code).cloned()
    }

    pub async fn requests_for(&self, pv_code: &str) -> Vec<StoredRequest> {
        let state = self.state.lock().await;
        let Some(order) = state.orders.iter().find(|o| o.pv_code == pv_code) else {
            return Vec::new();
        };
        state
            .requests
            .iter()
            .filter(|r| r.order_id == order.id)
            .cloned()
            .collect()
    }

    /// Attach a follow-up request to an existing order (manual follow-up)
    pub async fn add_request(&self, order_id: Uuid, request: NewFollowUpRequest) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        if !state.orders.iter().any(|o| o.id == order_id) {
            anyhow::bail!("Order {} not found", order_id);
        }
        let id = Uuid::new_v4();
        state.requests.push(StoredRequest {
            id,
            order_id,
            request,
        });
        Ok(id)
    }

    /// Attach a response comment to a request
    pub async fn add_comment(&self, request_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.requests.iter().any(|r| r.id == request_id) {
            anyhow::bail!("Request {} not found", request_id);
        }
        state.comments.push(StoredComment { request_id });
        Ok(())
    }

    pub async fn comment_count(&self) -> usize {
        self.state.lock().await.comments.len()
    }
}

#[cfg(test)]
impl MemoryState {
    fn check_writable(&self, pv_code: &str) -> Result<()> {
        if self.failing_keys.iter().any(|k| k == pv_code) {
            anyhow::bail!("write rejected for order {}", pv_code);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_order_ids(&self, pv_codes: &[String]) -> Result<HashMap<String, Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| pv_codes.contains(&o.pv_code))
            .map(|o| (o.pv_code.clone(), o.id))
            .collect())
    }

    async fn update_order(&self, order_id: Uuid, update: &OrderUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        #[cfg(test)]
        if let Some(existing) = state.orders.iter().find(|o| o.id == order_id) {
            state.check_writable(&existing.pv_code)?;
        }

        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .with_context(|| format!("Order {} not found", order_id))?;
        order.client_name = update.client_name.clone();
        order.salesperson = update.salesperson.clone();
        order.status = update.status;
        order.invoiced = update.invoiced;
        order.invoiced_date = update.invoiced_date;
        Ok(())
    }

    async fn create_order(
        &self,
        order: &NewOrder,
        request: Option<&NewFollowUpRequest>,
    ) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        #[cfg(test)]
        state.check_writable(&order.pv_code)?;
        if state.orders.iter().any(|o| o.pv_code == order.pv_code) {
            anyhow::bail!("duplicate key value violates unique constraint on pv_code {}", order.pv_code);
        }

        let id = Uuid::new_v4();
        state.orders.push(StoredOrder {
            id,
            pv_code: order.pv_code.clone(),
            client_name: order.client_name.clone(),
            salesperson: order.salesperson.clone(),
            order_date: order.order_date,
            invoiced: order.invoiced,
            invoiced_date: order.invoiced_date,
            status: order.status,
        });
        if let Some(req) = request {
            state.requests.push(StoredRequest {
                id: Uuid::new_v4(),
                order_id: id,
                request: req.clone(),
            });
        }
        Ok(id)
    }

    async fn active_orders(&self) -> Result<Vec<ActiveOrder>> {
        let state = self.state.lock().await;
        let active = state
            .orders
            .iter()
            .filter(|o| {
                !o.invoiced
                    && !matches!(o.status, OrderStatus::Atrasado | OrderStatus::Concluido)
            })
            .map(|o| {
                // Latest by request date; later insertion wins ties
                let latest = state
                    .requests
                    .iter()
                    .filter(|r| r.order_id == o.id)
                    .fold(None::<&StoredRequest>, |best, r| match best {
                        Some(b) if b.request.request_date > r.request.request_date => Some(b),
                        _ => Some(r),
                    });
                ActiveOrder {
                    id: o.id,
                    pv_code: o.pv_code.clone(),
                    status: o.status,
                    latest_forecast: latest.and_then(|r| r.request.forecast_date),
                }
            })
            .collect();
        Ok(active)
    }

    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .with_context(|| format!("Order {} not found", order_id))?;
        order.status = status;
        Ok(())
    }

    async fn delete_order_cascade(&self, pv_code: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(order_id) = state
            .orders
            .iter()
            .find(|o| o.pv_code == pv_code)
            .map(|o| o.id)
        else {
            return Ok(false);
        };

        let request_ids: Vec<Uuid> = state
            .requests
            .iter()
            .filter(|r| r.order_id == order_id)
            .map(|r| r.id)
            .collect();
        state.comments.retain(|c| !request_ids.contains(&c.request_id));
        state.requests.retain(|r| r.order_id != order_id);
        state.orders.retain(|o| o.id != order_id);
        Ok(true)
    }
}
