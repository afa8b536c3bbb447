//! Domain records shared by the pipeline stages and the persistence layer

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ImportError;

/// Order lifecycle status, stored as its Portuguese uppercase label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pendente,
    Respondido,
    Atrasado,
    Concluido,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pendente => "PENDENTE",
            OrderStatus::Respondido => "RESPONDIDO",
            OrderStatus::Atrasado => "ATRASADO",
            OrderStatus::Concluido => "CONCLUIDO",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDENTE" => Ok(OrderStatus::Pendente),
            "RESPONDIDO" => Ok(OrderStatus::Respondido),
            "ATRASADO" => Ok(OrderStatus::Atrasado),
            "CONCLUIDO" => Ok(OrderStatus::Concluido),
            other => anyhow::bail!("Unknown order status '{}'", other),
        }
    }
}

/// Export layout the header row was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `PV;Cliente;Vend.;Solicitante;...;Faturado;<invoice date>`
    Old,
    /// `Número;Cliente;Vendedor;Dt. Cadastro;Nro. Nfe.;...`
    New,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Old => f.write_str("OLD"),
            Schema::New => f.write_str("NEW"),
        }
    }
}

/// Follow-up request derived from a row, created only together with a new order
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDraft {
    pub requested_dept: String,
    pub request_date: NaiveDate,
    pub response_date: Option<NaiveDate>,
    pub forecast_date: Option<NaiveDate>,
    pub notes: String,
}

/// A data row after validation and derivation
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// 1-based logical line number in the decoded file
    pub line: usize,
    pub pv_code: String,
    pub client_name: String,
    pub salesperson: String,
    pub order_date: NaiveDate,
    pub invoiced: bool,
    pub invoiced_date: Option<NaiveDate>,
    pub forecast_date: Option<NaiveDate>,
    pub status: OrderStatus,
    pub request: Option<RequestDraft>,
}

impl NormalizedRow {
    /// Mutable fields written when the order already exists
    pub fn to_update(&self) -> OrderUpdate {
        OrderUpdate {
            client_name: self.client_name.clone(),
            salesperson: self.salesperson.clone(),
            status: self.status,
            invoiced: self.invoiced,
            invoiced_date: self.invoiced_date,
        }
    }

    pub fn to_new_order(&self) -> NewOrder {
        NewOrder {
            pv_code: self.pv_code.clone(),
            client_name: self.client_name.clone(),
            salesperson: self.salesperson.clone(),
            order_date: self.order_date,
            status: self.status,
            invoiced: self.invoiced,
            invoiced_date: self.invoiced_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub pv_code: String,
    pub client_name: String,
    pub salesperson: String,
    pub order_date: NaiveDate,
    pub status: OrderStatus,
    pub invoiced: bool,
    pub invoiced_date: Option<NaiveDate>,
}

/// Presentation fields an import may overwrite; key and order date never change
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub client_name: String,
    pub salesperson: String,
    pub status: OrderStatus,
    pub invoiced: bool,
    pub invoiced_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFollowUpRequest {
    pub requester_id: Uuid,
    pub requested_dept: String,
    pub request_date: NaiveDate,
    pub response_date: Option<NaiveDate>,
    pub forecast_date: Option<NaiveDate>,
    pub notes: String,
}

impl NewFollowUpRequest {
    pub fn from_draft(draft: &RequestDraft, requester_id: Uuid) -> Self {
        Self {
            requester_id,
            requested_dept: draft.requested_dept.clone(),
            request_date: draft.request_date,
            response_date: draft.response_date,
            forecast_date: draft.forecast_date,
            notes: draft.notes.clone(),
        }
    }
}

/// Order that the overdue pass may promote, with its latest request's forecast
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOrder {
    pub id: Uuid,
    pub pv_code: String,
    pub status: OrderStatus,
    pub latest_forecast: Option<NaiveDate>,
}

/// Result contract consumed by the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ImportOutcome {
    pub fn success(created: usize, updated: usize) -> Self {
        Self {
            success: true,
            created_count: Some(created),
            updated_count: Some(updated),
            error_message: None,
        }
    }

    pub fn failure(err: &ImportError) -> Self {
        Self {
            success: false,
            created_count: None,
            updated_count: None,
            error_message: Some(err.to_string()),
        }
    }

    pub fn message(&self) -> String {
        match (&self.error_message, self.created_count, self.updated_count) {
            (Some(msg), _, _) => msg.clone(),
            (None, created, updated) => format!(
                "Importação concluída! {} novos pedidos, {} atualizados.",
                created.unwrap_or(0),
                updated.unwrap_or(0)
            ),
        }
    }
}
