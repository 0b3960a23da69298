//! Report history, grouped by month in the display timezone.

use std::collections::BTreeMap;

use chrono::{Datelike, FixedOffset};
use reportdesk_core::config::HistoryConfig;
use reportdesk_core::error::{DeskError, Result};
use reportdesk_core::types::ReportRecord;

use crate::remote::ScheduleApi;

/// Reports of one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthGroup {
    pub year: i32,
    pub month: u32,
    pub records: Vec<ReportRecord>,
}

impl MonthGroup {
    /// `YYYY-MM`.
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

pub fn display_offset(config: &HistoryConfig) -> Result<FixedOffset> {
    FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
        DeskError::Config(format!(
            "history.utc_offset_minutes out of range: {}",
            config.utc_offset_minutes
        ))
    })
}

/// Group by the year-month of `reported_at` as seen at `offset`, newest
/// month first. Records keep their fetch order within a month.
pub fn group_by_month(records: Vec<ReportRecord>, offset: FixedOffset) -> Vec<MonthGroup> {
    let mut months: BTreeMap<(i32, u32), Vec<ReportRecord>> = BTreeMap::new();
    for record in records {
        let local = record.reported_at.with_timezone(&offset);
        months
            .entry((local.year(), local.month()))
            .or_default()
            .push(record);
    }
    months
        .into_iter()
        .rev()
        .map(|((year, month), records)| MonthGroup { year, month, records })
        .collect()
}

/// Fetch the history and group it for display.
pub async fn load_history(api: &dyn ScheduleApi, config: &HistoryConfig) -> Result<Vec<MonthGroup>> {
    let offset = display_offset(config)?;
    let records = api.list_report_history().await?;
    tracing::debug!("fetched {} report records", records.len());
    Ok(group_by_month(records, offset))
}

/// Plain-text rendering for the terminal.
pub fn render_history(groups: &[MonthGroup], offset: FixedOffset) -> String {
    if groups.is_empty() {
        return "No report history.\n".to_string();
    }
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!("{} ({} reports)\n", group.label(), group.records.len()));
        for record in &group.records {
            let at = record.reported_at.with_timezone(&offset);
            out.push_str(&format!(
                "  {}  {}  (schedule {})\n",
                at.format("%Y-%m-%d %H:%M:%S"),
                record.schedule_description,
                record.schedule_id
            ));
        }
    }
    out
}
