use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};

use crate::clicktime::{self, ClickTimeClient, ClickTimeError};
use crate::ledger::RunLedger;
use crate::models::NewExpenseSheet;
use crate::plan::{Plan, compose_expense_plan};
use crate::transport::Transport;

#[derive(Debug)]
pub struct PreparedRun {
    pub ledger: RunLedger,
    pub plan: Plan,
    /// Receipts that could not be uploaded, with the reason.
    pub failed: Vec<(String, ClickTimeError)>,
}

/// First phase: open an expense sheet, upload the receipts in `receipt_dir`
/// and plan one expense item per receipt under `profile`.
///
/// Only the sheet and receipts created here are planned, whatever `ledger`
/// already holds. A receipt that fails to upload is reported in `failed` so
/// the IDs already handed out can still be saved.
pub fn prepare<T: Transport>(
    client: &ClickTimeClient<T>,
    mut ledger: RunLedger,
    title: &str,
    receipt_dir: &Path,
    profile: &str,
) -> Result<PreparedRun, ClickTimeError> {
    let paths = clicktime::receipt_files(receipt_dir)?;

    let sheet = client.create_expense_sheet(&NewExpenseSheet {
        title: Some(title.to_string()),
        ..NewExpenseSheet::default()
    })?;
    let Some(sheet_id) = ledger.record_sheet(title, &sheet).map(str::to_string) else {
        return Err(ClickTimeError::MissingId(format!("expense sheet '{title}'")));
    };

    let batch = client.upload_receipt_files(&paths);
    let mut receipts = BTreeMap::new();
    for upload in &batch.uploaded {
        if let Some(id) = ledger.record_receipt(upload) {
            receipts.insert(upload.file_name.clone(), id.to_string());
        }
    }
    if !batch.failed.is_empty() {
        warn!(
            "{} receipt(s) were not uploaded and are left out of the plan",
            batch.failed.len()
        );
    }

    let plan = compose_expense_plan(&sheet_id, &receipts, profile);
    info!(
        "Prepared {} expense item(s) from {} receipt(s)",
        plan.calls.len(),
        batch.uploaded.len()
    );
    Ok(PreparedRun {
        ledger,
        plan,
        failed: batch.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clicktime::Credentials;
    use crate::config::ExpensePolicy;
    use crate::plan::PlannedCall;
    use crate::testing::FakeTransport;
    use std::fs;

    fn client(fake: &FakeTransport) -> ClickTimeClient<&FakeTransport> {
        ClickTimeClient::connect(fake, &Credentials::new("u", "p"), ExpensePolicy::default())
            .unwrap()
    }

    #[test]
    fn prepare_records_ids_and_plans_items() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_120_Taxi_20260201.png"), b"png").unwrap();

        let fake = FakeTransport::with_session()
            .route(
                "Companies/c1/Users/u1/ExpenseSheets",
                200,
                r#"{"ExpenseSheetID": "s1"}"#,
            )
            .route(
                "Companies/c1/Users/u1/Receipts",
                200,
                r#"{"ExpenseReceiptID": "r1"}"#,
            );
        let client = client(&fake);

        let run = prepare(&client, RunLedger::default(), "May", dir.path(), "tfb").unwrap();
        assert_eq!(run.ledger.sheets["May"], "s1");
        assert_eq!(run.ledger.receipts["1_120_Taxi_20260201.png"], "r1");
        assert_eq!(run.ledger.receipts.len(), 1);
        assert!(run.failed.is_empty());
        match &run.plan.calls[..] {
            [PlannedCall::CreateExpenseItem {
                sheet_id,
                receipt_id,
                amount,
                ..
            }] => {
                assert_eq!(sheet_id, "s1");
                assert_eq!(receipt_id.as_deref(), Some("r1"));
                assert_eq!(*amount, 120.0);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn prepare_plans_only_this_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2_300_Lunch_20260302.png"), b"png").unwrap();

        let mut ledger = RunLedger::default();
        ledger.sheets.insert("February".to_string(), "s_feb".to_string());
        ledger
            .receipts
            .insert("1_120_Taxi_20260201.png".to_string(), "r_old".to_string());

        let fake = FakeTransport::with_session()
            .route(
                "Companies/c1/Users/u1/ExpenseSheets",
                200,
                r#"{"ExpenseSheetID": "s_march"}"#,
            )
            .route(
                "Companies/c1/Users/u1/Receipts",
                200,
                r#"{"ExpenseReceiptID": "r_new"}"#,
            );
        let client = client(&fake);

        let run = prepare(&client, ledger, "March", dir.path(), "tfb").unwrap();
        assert_eq!(run.ledger.sheets.len(), 2);
        assert_eq!(run.ledger.sheets["February"], "s_feb");
        assert_eq!(run.ledger.sheets["March"], "s_march");
        assert_eq!(run.ledger.receipts.len(), 2);
        match &run.plan.calls[..] {
            [PlannedCall::CreateExpenseItem {
                sheet_id,
                receipt_id,
                expense_date,
                ..
            }] => {
                assert_eq!(sheet_id, "s_march");
                assert_eq!(receipt_id.as_deref(), Some("r_new"));
                assert_eq!(expense_date, "20260302");
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn prepare_keeps_ids_when_an_upload_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_120_Taxi_20260201.png"), b"png").unwrap();
        fs::write(dir.path().join("2_300_Lunch_20260202.png"), b"png").unwrap();

        let fake = FakeTransport::with_session()
            .route(
                "Companies/c1/Users/u1/ExpenseSheets",
                200,
                r#"{"ExpenseSheetID": "s1"}"#,
            )
            .route(
                "Companies/c1/Users/u1/Receipts",
                200,
                r#"{"ExpenseReceiptID": "r1"}"#,
            )
            .fail_on_call("Companies/c1/Users/u1/Receipts", 2);
        let client = client(&fake);

        let run = prepare(&client, RunLedger::default(), "May", dir.path(), "tfb").unwrap();
        assert_eq!(run.ledger.sheets["May"], "s1");
        assert_eq!(
            run.ledger.receipts.keys().collect::<Vec<_>>(),
            vec!["1_120_Taxi_20260201.png"]
        );
        assert_eq!(run.plan.calls.len(), 1);
        assert_eq!(run.failed.len(), 1);
        assert_eq!(run.failed[0].0, "2_300_Lunch_20260202.png");
    }

    #[test]
    fn prepare_checks_receipt_dir_before_creating_a_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeTransport::with_session();
        let client = client(&fake);

        let result = prepare(
            &client,
            RunLedger::default(),
            "May",
            &dir.path().join("absent"),
            "tfb",
        );
        assert!(matches!(result, Err(ClickTimeError::Io(_))));
        assert_eq!(fake.requests().len(), 1);
    }

    #[test]
    fn prepare_stops_without_sheet_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_120_Taxi_20260201.png"), b"png").unwrap();

        let fake = FakeTransport::with_session().route(
            "Companies/c1/Users/u1/ExpenseSheets",
            400,
            r#"{"Message": "Title is required"}"#,
        );
        let client = client(&fake);

        let result = prepare(&client, RunLedger::default(), "", dir.path(), "tfb");
        assert!(matches!(result, Err(ClickTimeError::MissingId(_))));
        assert!(
            fake.requests()
                .iter()
                .all(|request| !request.path.ends_with("Receipts"))
        );
    }
}
