use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clicktime::{ClickTimeClient, ClickTimeError};
use crate::config::{ItemProfile, LookupTable};
use crate::dates::{self, DateArg};
use crate::ledger::{read_json, write_json};
use crate::models::{NewExpenseItem, NewTimeEntry};
use crate::response::Body;
use crate::transport::Transport;

/// A call recorded for a later run. References (`job`, `task`, profile
/// fields) are resolved through the lookup table when the call is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum PlannedCall {
    CreateExpenseItem {
        profile: String,
        amount: f64,
        description: String,
        expense_date: String,
        sheet_id: String,
        #[serde(default)]
        receipt_id: Option<String>,
        #[serde(default)]
        bill_to_job: Option<bool>,
    },
    CreateTimeEntry {
        job: String,
        task: String,
        hours: f64,
        #[serde(default)]
        date: Option<String>,
        #[serde(default)]
        comment: Option<String>,
        #[serde(default)]
        break_time: Option<f64>,
    },
}

impl PlannedCall {
    pub fn operation(&self) -> &'static str {
        match self {
            PlannedCall::CreateExpenseItem { .. } => "create_expense_item",
            PlannedCall::CreateTimeEntry { .. } => "create_time_entry",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub calls: Vec<PlannedCall>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self, ClickTimeError> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClickTimeError> {
        write_json(path, self)?;
        info!("Saved {} planned call(s) to {}", self.calls.len(), path.display());
        Ok(())
    }
}

/// Details encoded in a receipt file name:
/// `<sequence>_<amount>_<description>_<YYYYMMDD>.<ext>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptName {
    pub sequence: String,
    pub amount: f64,
    pub description: String,
    pub date: String,
}

impl ReceiptName {
    pub fn parse(file_name: &str) -> Result<Self, String> {
        let mut parts = file_name.rsplitn(4, '_');
        let dated = parts.next().unwrap_or_default();
        let (Some(description), Some(amount), Some(sequence)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!(
                "'{file_name}' does not look like <sequence>_<amount>_<description>_<date>.<ext>"
            ));
        };

        let date = dated.rsplit_once('.').map_or(dated, |(stem, _)| stem);
        dates::parse_compact(date)?;
        let amount = amount
            .parse::<f64>()
            .map_err(|_| format!("'{amount}' in '{file_name}' is not an amount"))?;

        Ok(Self {
            sequence: sequence.to_string(),
            amount,
            description: description.to_string(),
            date: date.to_string(),
        })
    }
}

/// One expense item on `sheet_id` per receipt uploaded in the same run.
/// `receipts` maps receipt file names to their server IDs.
pub fn compose_expense_plan(
    sheet_id: &str,
    receipts: &BTreeMap<String, String>,
    profile: &str,
) -> Plan {
    let mut calls = Vec::new();
    for (file_name, receipt_id) in receipts {
        let name = match ReceiptName::parse(file_name) {
            Ok(name) => name,
            Err(err) => {
                warn!("Skipping receipt: {err}");
                continue;
            }
        };
        debug!("Planning receipt #{} from {file_name}", name.sequence);
        calls.push(PlannedCall::CreateExpenseItem {
            profile: profile.to_string(),
            amount: name.amount,
            description: name.description,
            expense_date: name.date,
            sheet_id: sheet_id.to_string(),
            receipt_id: Some(receipt_id.clone()),
            bill_to_job: None,
        });
    }
    Plan { calls }
}

/// What replaying a call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub operation: &'static str,
    pub status: u16,
    pub reason: String,
    pub created_id: Option<String>,
    pub malformed: bool,
}

/// Everything a replay needs besides the client.
pub struct ReplayContext<'a> {
    pub refs: &'a LookupTable,
    pub profiles: &'a BTreeMap<String, ItemProfile>,
    /// Multiplies every planned expense amount.
    pub rate: f64,
}

/// Runs each call in order, stopping at the first one that fails outright.
pub fn execute_plan<T: Transport>(
    client: &ClickTimeClient<T>,
    plan: &Plan,
    context: &ReplayContext<'_>,
) -> Result<Vec<ReplayOutcome>, ClickTimeError> {
    plan.calls
        .iter()
        .map(|call| dispatch(client, call, context))
        .collect()
}

fn dispatch<T: Transport>(
    client: &ClickTimeClient<T>,
    call: &PlannedCall,
    context: &ReplayContext<'_>,
) -> Result<ReplayOutcome, ClickTimeError> {
    let operation = call.operation();
    match call {
        PlannedCall::CreateExpenseItem {
            profile,
            amount,
            description,
            expense_date,
            sheet_id,
            receipt_id,
            bill_to_job,
        } => {
            let profile = context.profiles.get(profile).ok_or_else(|| {
                ClickTimeError::InvalidArgument(format!("Unknown expense profile '{profile}'"))
            })?;
            let item = NewExpenseItem {
                expense_sheet_id: sheet_id.clone(),
                amount: amount * context.rate,
                description: Some(description.clone()),
                expense_date: Some(DateArg::from(expense_date.as_str())),
                expense_type_id: Some(context.refs.resolve(&profile.expense_type).to_string()),
                job_id: Some(context.refs.resolve(&profile.job).to_string()),
                payment_type_id: Some(context.refs.resolve(&profile.payment_type).to_string()),
                receipt_id: receipt_id.clone(),
                bill_to_job: bill_to_job.or(profile.bill_to_job),
            };
            let response = client.create_expense_item(&item)?;
            let malformed = matches!(response.body, Body::Malformed { .. });
            let created_id = response
                .body
                .parsed()
                .and_then(|item| item.expense_item_id.clone());
            Ok(ReplayOutcome {
                operation,
                status: response.status,
                reason: response.reason,
                created_id,
                malformed,
            })
        }
        PlannedCall::CreateTimeEntry {
            job,
            task,
            hours,
            date,
            comment,
            break_time,
        } => {
            let entry = NewTimeEntry {
                job_id: context.refs.resolve(job).to_string(),
                task_id: context.refs.resolve(task).to_string(),
                hours: *hours,
                date: date.as_deref().map(DateArg::from),
                comment: comment.clone(),
                break_time: *break_time,
            };
            let response = client.create_time_entry(&entry)?;
            let malformed = matches!(response.body, Body::Malformed { .. });
            let created_id = response
                .body
                .parsed()
                .and_then(|entry| entry.time_entry_id.clone());
            Ok(ReplayOutcome {
                operation,
                status: response.status,
                reason: response.reason,
                created_id,
                malformed,
            })
        }
    }
}
