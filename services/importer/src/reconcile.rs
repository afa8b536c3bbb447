//! Reconciliation of normalized rows against stored orders (key-based upsert)
//!
//! - Rows are deduplicated by `pv_code`, first occurrence wins
//! - Existing orders are loaded in one query before any write
//! - Writes run in batches: concurrent inside a batch, sequential across batches
//! - A failed row never aborts the import; it is reported as a diagnostic

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{ImportError, SkipReason};
use crate::model::{NewFollowUpRequest, NormalizedRow};
use crate::report::Diagnostic;
use crate::store::OrderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Updated,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    /// Rows dropped as duplicate keys
    pub skipped: usize,
    pub failed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Keep the first row per key; later rows with the same key are reported as skipped.
///
/// Runs before the existing-order lookup, so dropped duplicates are never looked up.
/// The surviving first row carries the same key, so the lookup result is unchanged.
pub fn dedupe(rows: Vec<NormalizedRow>) -> (Vec<NormalizedRow>, Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(rows.len());
    let mut duplicates = Vec::new();

    for row in rows {
        if seen.insert(row.pv_code.clone()) {
            unique.push(row);
        } else {
            duplicates.push(Diagnostic::skipped(
                row.line,
                Some(&row.pv_code),
                SkipReason::DuplicateKey,
            ));
        }
    }

    (unique, duplicates)
}

async fn upsert_row<S: OrderStore + ?Sized>(
    store: &S,
    row: &NormalizedRow,
    existing: Option<Uuid>,
    requester_id: Uuid,
) -> anyhow::Result<RowOutcome> {
    match existing {
        Some(order_id) => {
            store.update_order(order_id, &row.to_update()).await?;
            Ok(RowOutcome::Updated)
        }
        None => {
            let request = row
                .request
                .as_ref()
                .map(|draft| NewFollowUpRequest::from_draft(draft, requester_id));
            store.create_order(&row.to_new_order(), request.as_ref()).await?;
            Ok(RowOutcome::Created)
        }
    }
}

/// Upsert every row of one import.
///
/// Only the pre-fetch of existing orders is fatal; row writes fail individually.
pub async fn reconcile<S: OrderStore + ?Sized>(
    store: &S,
    rows: Vec<NormalizedRow>,
    requester_id: Uuid,
    batch_size: usize,
) -> Result<ReconcileSummary, ImportError> {
    let (rows, duplicates) = dedupe(rows);
    let mut summary = ReconcileSummary {
        skipped: duplicates.len(),
        diagnostics: duplicates,
        ..ReconcileSummary::default()
    };

    let keys: Vec<String> = rows.iter().map(|r| r.pv_code.clone()).collect();
    let existing: HashMap<String, Uuid> = store
        .find_order_ids(&keys)
        .await
        .map_err(ImportError::persistence)?;

    tracing::info!(
        rows = rows.len(),
        existing = existing.len(),
        batch_size,
        "Reconciling rows"
    );

    for (batch_no, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        let results = join_all(batch.iter().map(|row| {
            upsert_row(store, row, existing.get(&row.pv_code).copied(), requester_id)
        }))
        .await;

        for (row, result) in batch.iter().zip(results) {
            match result {
                Ok(RowOutcome::Created) => summary.created += 1,
                Ok(RowOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(line = row.line, pv_code = %row.pv_code, "Row write failed: {:#}", e);
                    summary
                        .diagnostics
                        .push(Diagnostic::write_failed(row.line, &row.pv_code, &e));
                    summary.failed += 1;
                }
            }
        }

        tracing::debug!(batch = batch_no + 1, size = batch.len(), "Batch written");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, RequestDraft};
    use crate::report::DiagnosticKind;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(line: usize, pv_code: &str, client: &str) -> NormalizedRow {
        NormalizedRow {
            line,
            pv_code: pv_code.to_string(),
            client_name: client.to_string(),
            salesperson: "Ana".to_string(),
            order_date: ymd(2025, 9, 1),
            invoiced: false,
            invoiced_date: None,
            forecast_date: None,
            status: OrderStatus::Pendente,
            request: Some(RequestDraft {
                requested_dept: "PCP".to_string(),
                request_date: ymd(2025, 9, 2),
                response_date: None,
                forecast_date: None,
                notes: String::new(),
            }),
        }
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let rows = vec![row(2, "1001", "A"), row(3, "1002", "B"), row(4, "1001", "C")];
        let (unique, duplicates) = dedupe(rows);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].client_name, "A");
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].line, 4);
        assert_eq!(duplicates[0].detail, "duplicate_key");
    }

    #[tokio::test]
    async fn test_first_import_creates_second_updates() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        let rows = vec![row(2, "1001", "A"), row(3, "1002", "B"), row(4, "1003", "C")];

        let first = reconcile(&store, rows.clone(), requester, 2).await.unwrap();
        assert_eq!((first.created, first.updated, first.failed), (3, 0, 0));

        let second = reconcile(&store, rows, requester, 2).await.unwrap();
        assert_eq!((second.created, second.updated, second.failed), (0, 3, 0));
        assert_eq!(store.orders().await.len(), 3);
        // Requests only come with new orders
        assert_eq!(store.requests_for("1001").await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_touches_only_presentation_fields() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        reconcile(&store, vec![row(2, "1001", "A")], requester, 50)
            .await
            .unwrap();

        let mut changed = row(2, "1001", "A Renamed");
        changed.order_date = ymd(2030, 1, 1);
        changed.invoiced = true;
        changed.invoiced_date = Some(ymd(2025, 10, 1));
        changed.status = OrderStatus::Concluido;
        reconcile(&store, vec![changed], requester, 50).await.unwrap();

        let order = store.order("1001").await.unwrap();
        assert_eq!(order.client_name, "A Renamed");
        assert_eq!(order.order_date, ymd(2025, 9, 1));
        assert!(order.invoiced);
        assert_eq!(order.invoiced_date, Some(ymd(2025, 10, 1)));
        assert_eq!(order.status, OrderStatus::Concluido);
    }

    #[tokio::test]
    async fn test_duplicate_keys_create_one_order() {
        let store = MemoryStore::new();
        let rows = vec![row(2, "1001", "A"), row(3, "1001", "B")];
        let summary = reconcile(&store, rows, Uuid::new_v4(), 50).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.order("1001").await.unwrap().client_name, "A");
    }

    #[tokio::test]
    async fn test_duplicate_of_existing_order_updates_once() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        reconcile(&store, vec![row(2, "1001", "A")], requester, 50)
            .await
            .unwrap();

        let rows = vec![row(2, "1001", "First"), row(3, "1001", "Second")];
        let summary = reconcile(&store, rows, requester, 50).await.unwrap();

        assert_eq!((summary.created, summary.updated, summary.skipped), (0, 1, 1));
        assert_eq!(store.orders().await.len(), 1);
        assert_eq!(store.order("1001").await.unwrap().client_name, "First");
    }

    #[tokio::test]
    async fn test_failed_row_does_not_abort_batch() {
        let store = MemoryStore::failing_on(&["1002"]);
        let rows = vec![row(2, "1001", "A"), row(3, "1002", "B"), row(4, "1003", "C")];
        let summary = reconcile(&store, rows, Uuid::new_v4(), 50).await.unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        let failure = &summary.diagnostics[0];
        assert_eq!(failure.kind, DiagnosticKind::WriteFailed);
        assert_eq!(failure.pv_code.as_deref(), Some("1002"));
        assert!(store.order("1002").await.is_none());
        assert!(store.order("1003").await.is_some());
    }

    #[tokio::test]
    async fn test_request_carries_injected_requester() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        let mut no_request = row(3, "1002", "B");
        no_request.request = None;
        reconcile(&store, vec![row(2, "1001", "A"), no_request], requester, 50)
            .await
            .unwrap();

        let requests = store.requests_for("1001").await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request.requester_id, requester);
        assert_eq!(requests[0].request.request_date, ymd(2025, 9, 2));
        assert!(store.requests_for("1002").await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_size_still_processes() {
        let store = MemoryStore::new();
        let summary = reconcile(&store, vec![row(2, "1001", "A")], Uuid::new_v4(), 0)
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
    }
}
