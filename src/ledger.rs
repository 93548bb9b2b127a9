use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::clicktime::{ClickTimeError, UploadedReceipt};
use crate::models::ExpenseSheet;
use crate::response::Response;

/// IDs the server handed out during a run, keyed by the label the caller
/// knows them by (sheet title, receipt file name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    #[serde(default)]
    pub sheets: BTreeMap<String, String>,
    #[serde(default)]
    pub receipts: BTreeMap<String, String>,
}

impl RunLedger {
    pub fn record_sheet(&mut self, label: &str, response: &Response<ExpenseSheet>) -> Option<&str> {
        let Some(id) = response
            .body
            .parsed()
            .and_then(|sheet| sheet.expense_sheet_id.clone())
        else {
            warn!(
                "Expense sheet '{label}' came back without an ID ({} {})",
                response.status, response.reason
            );
            return None;
        };
        record(&mut self.sheets, "Expense sheet", label, id)
    }

    pub fn record_receipt(&mut self, upload: &UploadedReceipt) -> Option<&str> {
        let Some(id) = upload
            .response
            .body
            .parsed()
            .and_then(|receipt| receipt.receipt_id.clone())
        else {
            warn!(
                "Receipt '{}' came back without an ID ({} {})",
                upload.file_name, upload.response.status, upload.response.reason
            );
            return None;
        };
        record(&mut self.receipts, "Receipt", &upload.file_name, id)
    }

    pub fn load(path: &Path) -> Result<Self, ClickTimeError> {
        read_json(path)
    }

    /// Like `load`, but a ledger that does not exist yet is an empty one.
    pub fn load_or_default(path: &Path) -> Result<Self, ClickTimeError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ClickTimeError> {
        write_json(path, self)?;
        info!(
            "Saved {} sheet(s) and {} receipt(s) to {}",
            self.sheets.len(),
            self.receipts.len(),
            path.display()
        );
        Ok(())
    }
}

fn record<'a>(
    ids: &'a mut BTreeMap<String, String>,
    kind: &str,
    label: &str,
    id: String,
) -> Option<&'a str> {
    if let Some(previous) = ids.get(label).filter(|previous| **previous != id) {
        warn!("{kind} '{label}' was {previous}, replacing it with {id}");
    }
    ids.insert(label.to_string(), id);
    ids.get(label).map(String::as_str)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ClickTimeError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Writes through a sibling temp file so a failed write never truncates the
/// previous contents.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ClickTimeError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".temp");
    {
        let mut writer = BufWriter::new(File::create(&temp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Receipt;
    use crate::response::Body;
    use serde_json::Map;

    fn sheet_response(id: Option<&str>) -> Response<ExpenseSheet> {
        Response {
            status: 200,
            reason: "OK".to_string(),
            body: Body::Parsed(ExpenseSheet {
                expense_sheet_id: id.map(str::to_string),
                extra: Map::new(),
            }),
        }
    }

    fn upload(name: &str, body: Body<Receipt>) -> UploadedReceipt {
        UploadedReceipt {
            file_name: name.to_string(),
            response: Response {
                status: 200,
                reason: "OK".to_string(),
                body,
            },
        }
    }

    #[test]
    fn records_only_server_ids() {
        let mut ledger = RunLedger::default();
        assert_eq!(ledger.record_sheet("May", &sheet_response(Some("s1"))), Some("s1"));
        assert_eq!(ledger.record_sheet("June", &sheet_response(None)), None);
        assert_eq!(ledger.sheets.len(), 1);

        let receipt = Receipt {
            receipt_id: Some("r1".to_string()),
            extra: Map::new(),
        };
        assert_eq!(
            ledger.record_receipt(&upload("a.png", Body::Parsed(receipt))),
            Some("r1")
        );
        assert_eq!(
            ledger.record_receipt(&upload(
                "b.png",
                Body::Malformed {
                    raw: "oops".to_string(),
                    error: "expected value".to_string()
                }
            )),
            None
        );
        assert_eq!(ledger.receipts.keys().collect::<Vec<_>>(), vec!["a.png"]);
    }

    #[test]
    fn same_label_keeps_the_latest_id() {
        let mut ledger = RunLedger::default();
        ledger.record_sheet("May", &sheet_response(Some("s1")));
        assert_eq!(ledger.record_sheet("May", &sheet_response(Some("s2"))), Some("s2"));
        assert_eq!(ledger.sheets.len(), 1);
        assert_eq!(ledger.sheets["May"], "s2");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("ledger.json");
        let mut ledger = RunLedger::default();
        ledger.sheets.insert("May".to_string(), "s1".to_string());
        ledger
            .receipts
            .insert("1_120_Taxi_20260201.png".to_string(), "r1".to_string());

        ledger.save(&path).unwrap();
        assert!(!dir.path().join("runs").join("ledger.json.temp").exists());
        assert_eq!(RunLedger::load(&path).unwrap(), ledger);
    }

    #[test]
    fn missing_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::load_or_default(&dir.path().join("none.json")).unwrap();
        assert_eq!(ledger, RunLedger::default());
        assert!(RunLedger::load(&dir.path().join("none.json")).is_err());
    }
}
