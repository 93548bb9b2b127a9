use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dates::DateArg;

/// The authenticated company and user, with every field the server sent
/// rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    company_id: String,
    user_id: String,
    fields: BTreeMap<String, String>,
}

impl Session {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "Session information is not a JSON object".to_string())?;

        let fields: BTreeMap<String, String> = object
            .iter()
            .map(|(key, value)| (key.clone(), field_text(value)))
            .collect();

        let company_id = fields
            .get("CompanyID")
            .cloned()
            .ok_or_else(|| "Session information lacks CompanyID".to_string())?;
        let user_id = fields
            .get("UserID")
            .cloned()
            .ok_or_else(|| "Session information lacks UserID".to_string())?;

        Ok(Self {
            company_id,
            user_id,
            fields,
        })
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Client {
    #[serde(rename = "ClientID", default)]
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Job {
    #[serde(rename = "JobID", default)]
    pub job_id: Option<String>,
    #[serde(rename = "Number", default)]
    pub number: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Task {
    #[serde(rename = "TaskID", default)]
    pub task_id: Option<String>,
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeEntry {
    #[serde(rename = "TimeEntryID", default)]
    pub time_entry_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExpenseSheet {
    #[serde(rename = "ExpenseSheetID", default)]
    pub expense_sheet_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExpenseItem {
    #[serde(rename = "ExpenseItemID", default)]
    pub expense_item_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Receipt {
    #[serde(
        rename = "ExpenseReceiptID",
        alias = "ReceiptID",
        alias = "POST_ReceiptResult",
        default
    )]
    pub receipt_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Company and user records are passed through untouched.
pub type Company = Value;
pub type User = Value;

#[derive(Debug, Clone, Default)]
pub struct NewTimeEntry {
    pub job_id: String,
    pub task_id: String,
    pub hours: f64,
    pub date: Option<DateArg>,
    pub comment: Option<String>,
    pub break_time: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExpenseSheet {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tracking_id: Option<String>,
    pub date: Option<DateArg>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExpenseItem {
    pub expense_sheet_id: String,
    pub amount: f64,
    pub description: Option<String>,
    pub expense_date: Option<DateArg>,
    pub expense_type_id: Option<String>,
    pub job_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub receipt_id: Option<String>,
    pub bill_to_job: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeEntryBody {
    #[serde(rename = "JobID")]
    pub job_id: String,
    #[serde(rename = "TaskID")]
    pub task_id: String,
    pub date: String,
    pub hours: f64,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpenseSheetBody {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "TrackingID")]
    pub tracking_id: Option<String>,
    pub expense_sheet_date: String,
    pub has_foreign_currency: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpenseItemBody {
    pub amount: f64,
    #[serde(rename = "Amount_Currency")]
    pub amount_currency: String,
    pub bill_to_job: bool,
    pub comment: String,
    pub description: Option<String>,
    pub expense_date: String,
    #[serde(rename = "ExpenseItemID")]
    pub expense_item_id: String,
    #[serde(rename = "ExpenseReceiptID")]
    pub expense_receipt_id: Option<String>,
    #[serde(rename = "ExpenseReceiptURLs")]
    pub expense_receipt_urls: Vec<String>,
    #[serde(rename = "ExpenseSheetID")]
    pub expense_sheet_id: String,
    #[serde(rename = "ExpenseTypeID")]
    pub expense_type_id: Option<String>,
    #[serde(rename = "JobID")]
    pub job_id: Option<String>,
    #[serde(rename = "PaymentTypeID")]
    pub payment_type_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptBody {
    #[serde(rename = "ImageData")]
    pub image_data: String,
    #[serde(rename = "fileType")]
    pub file_type: String,
}
