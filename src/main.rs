use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

mod clicktime;
mod config;
mod dates;
mod ledger;
mod models;
mod plan;
mod response;
#[cfg(test)]
mod testing;
mod transport;
mod workflow;

use clicktime::{ClickTimeClient, ClickTimeError, Credentials};
use config::{Config, ConfigError};
use dates::DateArg;
use ledger::RunLedger;
use models::{NewExpenseSheet, NewTimeEntry};
use plan::{Plan, ReplayContext};
use response::{Body, Response};
use transport::HttpTransport;

#[derive(Parser)]
#[command(name = "clicktime", version, about = "ClickTime time and expense client")]
struct Cli {
    /// Configuration file (defaults to ~/.clicktime.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured username
    #[arg(long, global = true)]
    username: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file if there is none yet
    InitConfig,
    /// Show the session the credentials open
    Session {
        /// Print only this session field
        #[arg(long)]
        field: Option<String>,
    },
    Company {
        #[arg(long)]
        id: Option<String>,
    },
    User {
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        id: Option<String>,
    },
    Clients {
        /// Only the client with this ClientID
        #[arg(long)]
        id: Option<String>,
    },
    Jobs {
        /// Only the job with this job number
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        no_child_ids: bool,
    },
    Tasks {
        /// Only the task with this code
        #[arg(long)]
        code: Option<String>,
    },
    /// List time entries; dates are YYYYMMDD and span at most seven days
    TimeEntries {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Log time against a job and task (names from `refs` are resolved)
    LogTime {
        #[arg(long)]
        job: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        hours: f64,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        break_time: Option<f64>,
    },
    ExpenseSheets,
    ExpenseItems {
        #[arg(long)]
        sheet: String,
    },
    CreateSheet {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        tracking_id: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Record the new sheet ID in this ledger
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    UploadReceipts {
        #[arg(long)]
        dir: PathBuf,
        /// Record the receipt IDs in this ledger
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Phase one: create a sheet, upload receipts and write a replay plan
    Prepare {
        #[arg(long)]
        title: String,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, default_value = "default")]
        profile: String,
    },
    /// Phase two: replay a (possibly edited) plan
    Replay {
        #[arg(long)]
        plan: PathBuf,
        /// Exchange rate applied to every planned expense amount
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_path()?,
    };

    if let Command::InitConfig = cli.command {
        if config_path.exists() {
            println!("{} already exists", config_path.display());
        } else {
            config::write_config(&config_path, &Config::default())?;
            println!("Wrote {}", config_path.display());
        }
        return Ok(());
    }

    let config = config::read_config(&config_path, cli.config.is_some())?;
    let client = connect(cli.username.clone(), &config)?;
    run(&client, &config, cli.command)
}

fn connect(
    username: Option<String>,
    config: &Config,
) -> Result<ClickTimeClient<HttpTransport>, Box<dyn Error>> {
    let username = username
        .or_else(|| config::read_username(config))
        .ok_or("No username: pass --username, set CLICKTIME_USERNAME or add it to the config")?;
    let password = match config::read_password() {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt(format!("ClickTime password for {username}"))
            .interact()?,
    };

    let transport = HttpTransport::new(&config.base_url)?;
    let credentials = Credentials::new(username, password);
    Ok(ClickTimeClient::connect(
        transport,
        &credentials,
        config.policy.clone(),
    )?)
}

fn run(
    client: &ClickTimeClient<HttpTransport>,
    config: &Config,
    command: Command,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::InitConfig => Ok(()),
        Command::Session { field: None } => print_json(client.session()),
        Command::Session { field: Some(field) } => match client.session().get(&field) {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => Err(format!("The session has no field '{field}'").into()),
        },
        Command::Company { id } => print_response(&client.company(id.as_deref())?),
        Command::User { company, id } => {
            print_response(&client.user(company.as_deref(), id.as_deref())?)
        }
        Command::Clients { id } => print_response(&client.clients(id.as_deref())?),
        Command::Jobs {
            number,
            no_child_ids,
        } => print_response(&client.jobs(number.as_deref(), !no_child_ids)?),
        Command::Tasks { code } => print_response(&client.tasks(code.as_deref())?),
        Command::TimeEntries { start, end } => {
            let start = start.map(DateArg::from);
            let end = end.map(DateArg::from);
            print_response(&client.time_entries(start.as_ref(), end.as_ref())?)
        }
        Command::LogTime {
            job,
            task,
            hours,
            date,
            comment,
            break_time,
        } => {
            let entry = NewTimeEntry {
                job_id: config.refs.resolve(&job).to_string(),
                task_id: config.refs.resolve(&task).to_string(),
                hours,
                date: date.map(DateArg::from),
                comment,
                break_time,
            };
            print_response(&client.create_time_entry(&entry)?)
        }
        Command::ExpenseSheets => print_response(&client.expense_sheets(None, None)?),
        Command::ExpenseItems { sheet } => {
            print_response(&client.expense_items(&sheet, None, None)?)
        }
        Command::CreateSheet {
            title,
            description,
            tracking_id,
            date,
            ledger,
        } => {
            let sheet = NewExpenseSheet {
                title: Some(title.clone()),
                description,
                tracking_id,
                date: date.map(DateArg::from),
            };
            let run_ledger = open_ledger(ledger)?;
            let response = client.create_expense_sheet(&sheet)?;
            let printed = print_response(&response);
            if let Some((path, mut run_ledger)) = run_ledger {
                run_ledger.record_sheet(&title, &response);
                run_ledger.save(&path)?;
            }
            printed
        }
        Command::UploadReceipts { dir, ledger } => {
            let run_ledger = open_ledger(ledger)?;
            let batch = client.upload_receipts(&dir)?;
            if let Some((path, mut run_ledger)) = run_ledger {
                for receipt in &batch.uploaded {
                    run_ledger.record_receipt(receipt);
                }
                run_ledger.save(&path)?;
            }
            for receipt in &batch.uploaded {
                println!("{}", receipt.file_name);
                print_response(&receipt.response)?;
            }
            report_failed_uploads(&batch.failed)
        }
        Command::Prepare {
            title,
            dir,
            ledger,
            plan,
            profile,
        } => {
            if !config.profiles.contains_key(&profile) {
                return Err(ConfigError::UnknownProfile(profile).into());
            }
            let run_ledger = RunLedger::load_or_default(&ledger)?;
            let prepared = workflow::prepare(client, run_ledger, &title, &dir, &profile)?;
            prepared.ledger.save(&ledger)?;
            prepared.plan.save(&plan)?;
            print_json(&prepared.ledger)?;
            report_failed_uploads(&prepared.failed)?;
            info!("Review {} and run `clicktime replay`", plan.display());
            Ok(())
        }
        Command::Replay { plan, rate } => {
            let plan = Plan::load(&plan)?;
            let context = ReplayContext {
                refs: &config.refs,
                profiles: &config.profiles,
                rate,
            };
            let outcomes = plan::execute_plan(client, &plan, &context)?;
            print_json(&outcomes)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Must run before the create call whose ID goes into the ledger.
fn open_ledger(path: Option<PathBuf>) -> Result<Option<(PathBuf, RunLedger)>, ClickTimeError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let ledger = RunLedger::load_or_default(&path)?;
    Ok(Some((path, ledger)))
}

fn report_failed_uploads(failed: &[(String, ClickTimeError)]) -> Result<(), Box<dyn Error>> {
    if failed.is_empty() {
        return Ok(());
    }
    for (file_name, err) in failed {
        eprintln!("{file_name}: {err}");
    }
    Err(format!("{} receipt(s) failed to upload", failed.len()).into())
}

fn print_response<T: Serialize>(response: &Response<T>) -> Result<(), Box<dyn Error>> {
    match &response.body {
        Body::Parsed(value) => print_json(value),
        Body::Empty => {
            eprintln!("{} {}: empty response", response.status, response.reason);
            Ok(())
        }
        Body::Malformed { raw, error } => Err(format!(
            "{} {}: malformed response ({error}): {raw}",
            response.status, response.reason
        )
        .into()),
    }
}
