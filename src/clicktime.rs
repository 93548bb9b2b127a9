use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{error, info};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ExpensePolicy;
use crate::dates::{self, DateArg, EntryWindow};
use crate::models::{
    Client, Company, ExpenseItem, ExpenseItemBody, ExpenseSheet, ExpenseSheetBody, Job,
    NewExpenseItem, NewExpenseSheet, NewTimeEntry, Receipt, ReceiptBody, Session, Task, TimeEntry,
    TimeEntryBody, User,
};
use crate::response::{Body, Response};
use crate::transport::{ApiRequest, Transport, TransportError, merge_headers};

#[derive(Debug, thiserror::Error)]
pub enum ClickTimeError {
    #[error("Failure to establish session information: {0}")]
    Session(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Server response for {0} carried no ID")]
    MissingId(String),
    #[error("Network error: {0}")]
    Transport(#[from] TransportError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UploadedReceipt {
    pub file_name: String,
    pub response: Response<Receipt>,
}

/// Result of uploading several receipts. A failed file does not stop the
/// files after it.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub uploaded: Vec<UploadedReceipt>,
    pub failed: Vec<(String, ClickTimeError)>,
}

/// Client for one authenticated ClickTime session.
pub struct ClickTimeClient<T: Transport> {
    transport: T,
    headers: HeaderMap,
    session: Session,
    policy: ExpensePolicy,
}

impl<T: Transport> ClickTimeClient<T> {
    /// Fixes the Authorization header and loads the session. Fails when the
    /// session cannot be read or lacks its company or user.
    pub fn connect(
        transport: T,
        credentials: &Credentials,
        policy: ExpensePolicy,
    ) -> Result<Self, ClickTimeError> {
        let authorization = HeaderValue::from_str(&credentials.authorization())
            .map_err(|err| ClickTimeError::InvalidArgument(err.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        let raw = transport.send(&ApiRequest::get("Session", headers.clone()))?;
        let session = match Body::<Value>::parse(&raw.body) {
            Body::Parsed(value) => Session::from_value(&value).map_err(ClickTimeError::Session)?,
            Body::Empty => {
                return Err(ClickTimeError::Session(format!(
                    "empty response ({} {})",
                    raw.status, raw.reason
                )));
            }
            Body::Malformed { error, .. } => {
                return Err(ClickTimeError::Session(format!(
                    "unreadable response ({} {}): {error}",
                    raw.status, raw.reason
                )));
            }
        };
        info!(
            "Session established for company {} user {}",
            session.company_id(),
            session.user_id()
        );

        Ok(Self {
            transport,
            headers,
            session,
            policy,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn get_with_headers<R: DeserializeOwned>(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> Result<Response<R>, ClickTimeError> {
        let request = ApiRequest::get(path, merge_headers(headers, &self.headers));
        let raw = self.transport.send(&request)?;
        Ok(Response::from_raw(raw))
    }

    pub fn post_with_headers<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
        body: &B,
    ) -> Result<Response<R>, ClickTimeError> {
        let body = serde_json::to_string(body)?;
        let request = ApiRequest::post(path, merge_headers(headers, &self.headers), body);
        let raw = self.transport.send(&request)?;
        Ok(Response::from_raw(raw))
    }

    fn get<R: DeserializeOwned>(&self, path: &str) -> Result<Response<R>, ClickTimeError> {
        self.get_with_headers(path, None)
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response<R>, ClickTimeError> {
        self.post_with_headers(path, None, body)
    }

    fn user_path(&self, company_id: Option<&str>, user_id: Option<&str>, rest: &str) -> String {
        format!(
            "Companies/{}/Users/{}/{}",
            company_id.unwrap_or(self.session.company_id()),
            user_id.unwrap_or(self.session.user_id()),
            rest
        )
    }

    pub fn company(&self, company_id: Option<&str>) -> Result<Response<Company>, ClickTimeError> {
        let company_id = company_id.unwrap_or(self.session.company_id());
        self.get(&format!("Companies/{company_id}"))
    }

    pub fn user(
        &self,
        company_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Response<User>, ClickTimeError> {
        let company_id = company_id.unwrap_or(self.session.company_id());
        let user_id = user_id.unwrap_or(self.session.user_id());
        self.get(&format!("Companies/{company_id}/Users/{user_id}"))
    }

    /// Clients of the current user, optionally narrowed to one `ClientID`.
    pub fn clients(
        &self,
        client_id: Option<&str>,
    ) -> Result<Response<Vec<Client>>, ClickTimeError> {
        let response = self.get(&self.user_path(None, None, "Clients"))?;
        Ok(select_matching(response.empty_as_list(), client_id, |client: &Client| {
            client.client_id.as_deref()
        }))
    }

    /// Jobs of the current user, optionally narrowed to one job `Number`.
    pub fn jobs(
        &self,
        job_number: Option<&str>,
        with_child_ids: bool,
    ) -> Result<Response<Vec<Job>>, ClickTimeError> {
        let mut path = self.user_path(None, None, "Jobs");
        if with_child_ids {
            path.push_str("?withChildIDs=true");
        }
        let response = self.get(&path)?;
        Ok(select_matching(response.empty_as_list(), job_number, |job: &Job| {
            job.number.as_deref()
        }))
    }

    /// Tasks of the current user, optionally narrowed to one task `Code`.
    pub fn tasks(&self, task_code: Option<&str>) -> Result<Response<Vec<Task>>, ClickTimeError> {
        let response = self.get(&self.user_path(None, None, "Tasks"))?;
        Ok(select_matching(response.empty_as_list(), task_code, |task: &Task| {
            task.code.as_deref()
        }))
    }

    pub fn time_entries(
        &self,
        start: Option<&DateArg>,
        end: Option<&DateArg>,
    ) -> Result<Response<Vec<TimeEntry>>, ClickTimeError> {
        let window =
            EntryWindow::from_options(start, end).map_err(ClickTimeError::InvalidArgument)?;
        let mut path = self.user_path(None, None, "TimeEntries");
        if let Some(query) = window.query() {
            path.push('?');
            path.push_str(&query);
        }
        Ok(self.get::<Vec<TimeEntry>>(&path)?.empty_as_list())
    }

    pub fn create_time_entry(
        &self,
        entry: &NewTimeEntry,
    ) -> Result<Response<TimeEntry>, ClickTimeError> {
        let date = dates::resolve_or_today(entry.date.as_ref())
            .map_err(ClickTimeError::InvalidArgument)?;
        let body = TimeEntryBody {
            job_id: entry.job_id.clone(),
            task_id: entry.task_id.clone(),
            date: dates::format_compact(date),
            hours: entry.hours,
            comment: entry.comment.clone().unwrap_or_default(),
            break_time: entry.break_time,
        };
        let response = self.post(&self.user_path(None, None, "TimeEntries"), &body)?;
        info!(
            "Logged {} hours on job {} for {}",
            body.hours, body.job_id, body.date
        );
        Ok(response)
    }

    pub fn expense_sheets(
        &self,
        company_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Response<Vec<ExpenseSheet>>, ClickTimeError> {
        let path = self.user_path(company_id, user_id, "ExpenseSheets");
        Ok(self.get::<Vec<ExpenseSheet>>(&path)?.empty_as_list())
    }

    pub fn expense_items(
        &self,
        expense_sheet_id: &str,
        company_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Response<Vec<ExpenseItem>>, ClickTimeError> {
        let path = self.user_path(
            company_id,
            user_id,
            &format!("ExpenseSheets/{expense_sheet_id}/ExpenseItems"),
        );
        Ok(self.get::<Vec<ExpenseItem>>(&path)?.empty_as_list())
    }

    pub fn create_expense_sheet(
        &self,
        sheet: &NewExpenseSheet,
    ) -> Result<Response<ExpenseSheet>, ClickTimeError> {
        let date = dates::resolve_or_today(sheet.date.as_ref())
            .map_err(ClickTimeError::InvalidArgument)?;
        let body = ExpenseSheetBody {
            title: sheet.title.clone(),
            description: sheet.description.clone(),
            tracking_id: sheet.tracking_id.clone(),
            expense_sheet_date: dates::format_compact(date),
            has_foreign_currency: self.policy.has_foreign_currency,
        };
        let response: Response<ExpenseSheet> =
            self.post(&self.user_path(None, None, "ExpenseSheets"), &body)?;
        if let Some(id) = response
            .body
            .parsed()
            .and_then(|sheet| sheet.expense_sheet_id.as_deref())
        {
            info!("Created expense sheet {id}");
        }
        Ok(response)
    }

    pub fn create_expense_item(
        &self,
        item: &NewExpenseItem,
    ) -> Result<Response<ExpenseItem>, ClickTimeError> {
        if item.expense_sheet_id.trim().is_empty() {
            return Err(ClickTimeError::InvalidArgument(
                "An expense item needs the ID of its expense sheet".to_string(),
            ));
        }
        let date = dates::resolve_or_today(item.expense_date.as_ref())
            .map_err(ClickTimeError::InvalidArgument)?;
        let body = ExpenseItemBody {
            amount: item.amount,
            amount_currency: self.policy.currency.clone(),
            bill_to_job: item.bill_to_job.unwrap_or(self.policy.bill_to_job),
            comment: String::new(),
            description: item.description.clone(),
            expense_date: dates::format_compact(date),
            expense_item_id: String::new(),
            expense_receipt_id: item.receipt_id.clone(),
            expense_receipt_urls: Vec::new(),
            expense_sheet_id: item.expense_sheet_id.clone(),
            expense_type_id: item.expense_type_id.clone(),
            job_id: item.job_id.clone(),
            payment_type_id: item.payment_type_id.clone(),
        };
        let path = self.user_path(
            None,
            None,
            &format!("ExpenseSheets/{}/ExpenseItems", item.expense_sheet_id),
        );
        let response = self.post(&path, &body)?;
        info!(
            "Added {} {} to expense sheet {}",
            body.amount, body.amount_currency, body.expense_sheet_id
        );
        Ok(response)
    }

    pub fn upload_receipt(&self, path: &Path) -> Result<UploadedReceipt, ClickTimeError> {
        let image = fs::read(path)?;
        let body = ReceiptBody {
            image_data: STANDARD.encode(&image),
            file_type: receipt_file_type(path, &self.policy.receipt_file_type),
        };
        let response = self.post(&self.user_path(None, None, "Receipts"), &body)?;
        let file_name = file_name(path);
        info!("Uploaded receipt {file_name}");
        Ok(UploadedReceipt {
            file_name,
            response,
        })
    }

    /// Uploads every regular file in `dir`, in file name order.
    pub fn upload_receipts(&self, dir: &Path) -> Result<UploadBatch, ClickTimeError> {
        let paths = receipt_files(dir)?;
        Ok(self.upload_receipt_files(&paths))
    }

    pub fn upload_receipt_files(&self, paths: &[PathBuf]) -> UploadBatch {
        let mut batch = UploadBatch::default();
        for path in paths {
            match self.upload_receipt(path) {
                Ok(upload) => batch.uploaded.push(upload),
                Err(err) => {
                    error!("Failed to upload receipt {}: {err}", path.display());
                    batch.failed.push((file_name(path), err));
                }
            }
        }
        batch
    }
}

/// Regular files in `dir`, sorted by path.
pub fn receipt_files(dir: &Path) -> Result<Vec<PathBuf>, ClickTimeError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn select_matching<R>(
    response: Response<Vec<R>>,
    wanted: Option<&str>,
    key: impl Fn(&R) -> Option<&str>,
) -> Response<Vec<R>> {
    let Some(wanted) = wanted else {
        return response;
    };
    response.map(|records| {
        records
            .into_iter()
            .find(|record| key(record) == Some(wanted))
            .into_iter()
            .collect()
    })
}

fn receipt_file_type(path: &Path, fallback: &str) -> String {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => fallback,
    }
    .to_string()
}
