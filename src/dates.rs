use chrono::{Duration, Local, NaiveDate};

const COMPACT_FORMAT: &str = "%Y%m%d";
const MAX_WINDOW_DAYS: i64 = 7;

/// A date given either already parsed or as `YYYYMMDD` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateArg {
    Date(NaiveDate),
    Text(String),
}

impl DateArg {
    pub fn resolve(&self) -> Result<NaiveDate, String> {
        match self {
            DateArg::Date(date) => Ok(*date),
            DateArg::Text(value) => parse_compact(value),
        }
    }
}

impl From<NaiveDate> for DateArg {
    fn from(date: NaiveDate) -> Self {
        DateArg::Date(date)
    }
}

impl From<&str> for DateArg {
    fn from(value: &str) -> Self {
        DateArg::Text(value.to_string())
    }
}

impl From<String> for DateArg {
    fn from(value: String) -> Self {
        DateArg::Text(value)
    }
}

/// Which time entries to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryWindow {
    ServerDefault,
    Day(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

impl EntryWindow {
    pub fn from_options(start: Option<&DateArg>, end: Option<&DateArg>) -> Result<Self, String> {
        match (start, end) {
            (None, Some(_)) => {
                Err("If an end date is provided you must provide a start date.".to_string())
            }
            (None, None) => Ok(EntryWindow::ServerDefault),
            (Some(start), None) => Ok(EntryWindow::Day(start.resolve()?)),
            (Some(start), Some(end)) => {
                let start = start.resolve()?;
                let end = end.resolve()?;
                if end < start {
                    return Err("End date cannot be before start date.".to_string());
                }
                if end - start > Duration::days(MAX_WINDOW_DAYS) {
                    return Err(format!(
                        "You can only request up to {MAX_WINDOW_DAYS} days of time entries."
                    ));
                }
                Ok(EntryWindow::Range { start, end })
            }
        }
    }

    pub fn query(&self) -> Option<String> {
        match self {
            EntryWindow::ServerDefault => None,
            EntryWindow::Day(date) => Some(format!("date={}", format_compact(*date))),
            EntryWindow::Range { start, end } => Some(format!(
                "startdate={}&enddate={}",
                format_compact(*start),
                format_compact(*end)
            )),
        }
    }
}

pub fn parse_compact(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), COMPACT_FORMAT)
        .map_err(|_| format!("Invalid date '{value}'. Use YYYYMMDD."))
}

pub fn format_compact(date: NaiveDate) -> String {
    date.format(COMPACT_FORMAT).to_string()
}

/// Resolves an optional date, falling back to today.
pub fn resolve_or_today(date: Option<&DateArg>) -> Result<NaiveDate, String> {
    match date {
        Some(date) => date.resolve(),
        None => Ok(Local::now().date_naive()),
    }
}
