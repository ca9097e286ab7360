//! Trailing-window train / validation / test split of the dense grid.

use chrono::{Duration as ChronoDuration, NaiveDate};
use tracing::info;

use crate::grid::DenseGridRow;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateSplit {
    pub train: Vec<DenseGridRow>,
    pub validation: Vec<DenseGridRow>,
    pub test: Vec<DenseGridRow>,
}

pub fn split_by_date(rows: Vec<DenseGridRow>, validation_days: u32, test_days: u32) -> DateSplit {
    let Some(max_date) = rows.iter().map(|row| row.date).max() else {
        return DateSplit::default();
    };

    let end_exclusive = max_date.succ_opt().unwrap_or(NaiveDate::MAX);
    let test_start = days_before(end_exclusive, test_days);
    let validation_start = days_before(test_start, validation_days);

    let mut split = DateSplit::default();
    for row in rows {
        if row.date >= test_start {
            split.test.push(row);
        } else if row.date >= validation_start {
            split.validation.push(row);
        } else {
            split.train.push(row);
        }
    }

    info!(
        component = "split",
        event = "split.by_date.finish",
        max_date = %max_date,
        test_start = %test_start,
        validation_start = %validation_start,
        train_rows = split.train.len(),
        validation_rows = split.validation.len(),
        test_rows = split.test.len()
    );

    split
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_signed(ChronoDuration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}
