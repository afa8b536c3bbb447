//! Overdue pass: promote active orders whose latest forecast has passed to ATRASADO
//!
//! Runs independently of imports. If both touch the same order at once, the last
//! write wins.

use anyhow::Result;
use chrono::NaiveDate;
use std::time::Duration;

use crate::model::OrderStatus;
use crate::store::OrderStore;

/// One pass over the active orders. Returns how many were promoted.
pub async fn mark_overdue<S: OrderStore + ?Sized>(store: &S, today: NaiveDate) -> Result<usize> {
    let active = store.active_orders().await?;
    let mut promoted = 0;

    for order in &active {
        let Some(forecast) = order.latest_forecast else {
            continue;
        };
        if forecast < today && order.status != OrderStatus::Atrasado {
            tracing::info!(pv_code = %order.pv_code, %forecast, "Marking order as ATRASADO");
            store.set_status(order.id, OrderStatus::Atrasado).await?;
            promoted += 1;
        }
    }

    tracing::info!(checked = active.len(), promoted, "Overdue pass finished");
    Ok(promoted)
}

/// Repeat the pass every `interval`, re-reading "today" before each run
pub async fn run_periodically<S, F>(store: &S, interval: Duration, today: F) -> Result<()>
where
    S: OrderStore + ?Sized,
    F: Fn() -> NaiveDate,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match mark_overdue(store, today()).await {
            Ok(promoted) => println!("Updated {} orders to ATRASADO.", promoted),
            // Keep the loop alive; the next tick retries
            Err(e) => tracing::error!("Overdue pass failed: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewFollowUpRequest, NewOrder};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        ymd(2025, 10, 15)
    }

    async fn seed(
        store: &MemoryStore,
        pv_code: &str,
        status: OrderStatus,
        invoiced: bool,
        forecast: Option<NaiveDate>,
    ) {
        let order = NewOrder {
            pv_code: pv_code.to_string(),
            client_name: "ACME".to_string(),
            salesperson: "Ana".to_string(),
            order_date: ymd(2025, 9, 1),
            status,
            invoiced,
            invoiced_date: None,
        };
        let request = NewFollowUpRequest {
            requester_id: Uuid::nil(),
            requested_dept: "PCP".to_string(),
            request_date: ymd(2025, 9, 5),
            response_date: None,
            forecast_date: forecast,
            notes: String::new(),
        };
        store.create_order(&order, Some(&request)).await.unwrap();
    }

    #[tokio::test]
    async fn test_promotes_only_past_forecasts() {
        let store = MemoryStore::new();
        seed(&store, "late", OrderStatus::Pendente, false, Some(ymd(2025, 10, 14))).await;
        seed(&store, "responded-late", OrderStatus::Respondido, false, Some(ymd(2025, 10, 1))).await;
        seed(&store, "due-today", OrderStatus::Pendente, false, Some(today())).await;
        seed(&store, "future", OrderStatus::Respondido, false, Some(ymd(2025, 11, 1))).await;
        seed(&store, "no-forecast", OrderStatus::Pendente, false, None).await;

        let promoted = mark_overdue(&store, today()).await.unwrap();

        assert_eq!(promoted, 2);
        assert_eq!(store.order("late").await.unwrap().status, OrderStatus::Atrasado);
        assert_eq!(store.order("responded-late").await.unwrap().status, OrderStatus::Atrasado);
        assert_eq!(store.order("due-today").await.unwrap().status, OrderStatus::Pendente);
        assert_eq!(store.order("future").await.unwrap().status, OrderStatus::Respondido);
        assert_eq!(store.order("no-forecast").await.unwrap().status, OrderStatus::Pendente);
    }

    #[tokio::test]
    async fn test_invoiced_and_completed_untouched() {
        let store = MemoryStore::new();
        seed(&store, "invoiced", OrderStatus::Pendente, true, Some(ymd(2025, 1, 1))).await;
        seed(&store, "done", OrderStatus::Concluido, false, Some(ymd(2025, 1, 1))).await;

        assert_eq!(mark_overdue(&store, today()).await.unwrap(), 0);
        assert_eq!(store.order("invoiced").await.unwrap().status, OrderStatus::Pendente);
        assert_eq!(store.order("done").await.unwrap().status, OrderStatus::Concluido);
    }

    #[tokio::test]
    async fn test_latest_request_decides() {
        let store = MemoryStore::new();
        seed(&store, "1001", OrderStatus::Respondido, false, Some(ymd(2025, 10, 1))).await;
        let order_id = store.order("1001").await.unwrap().id;
        store
            .add_request(
                order_id,
                NewFollowUpRequest {
                    requester_id: Uuid::nil(),
                    requested_dept: "PCP".to_string(),
                    request_date: ymd(2025, 10, 10),
                    response_date: Some(ymd(2025, 10, 11)),
                    forecast_date: Some(ymd(2025, 11, 30)),
                    notes: "nova previsão".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(mark_overdue(&store, today()).await.unwrap(), 0);
        assert_eq!(store.order("1001").await.unwrap().status, OrderStatus::Respondido);
    }

    #[tokio::test]
    async fn test_pass_is_idempotent() {
        let store = MemoryStore::new();
        seed(&store, "late", OrderStatus::Pendente, false, Some(ymd(2025, 10, 1))).await;
        assert_eq!(mark_overdue(&store, today()).await.unwrap(), 1);
        assert_eq!(mark_overdue(&store, today()).await.unwrap(), 0);
    }
}
