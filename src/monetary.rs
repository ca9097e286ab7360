//! Sales amount and price cleaning.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar::TimedEvent;
use crate::engine::EngineError;
use crate::events::{columns, FieldValue};

pub const NO_SALE_SENTINELS: [&str; 3] = ["-1", "-1.0", "\"-1\""];
const NO_SALE_NUMERIC: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesOutcome {
    Sentinel,
    Clamped,
    Kept,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub sales_amount: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedEvent {
    pub event: TimedEvent,
    pub money: Money,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryReport {
    pub rows: u64,
    pub sentinel_sales: u64,
    pub clamped_sales: u64,
}

pub fn is_no_sale_sentinel(value: &FieldValue) -> bool {
    match value {
        FieldValue::Int(v) => *v == -1,
        FieldValue::Float(v) => *v == NO_SALE_NUMERIC,
        FieldValue::Text(raw) => NO_SALE_SENTINELS.contains(&raw.trim()),
    }
}

pub fn normalize_sales_amount(
    value: &FieldValue,
    row: usize,
) -> Result<(f64, SalesOutcome), EngineError> {
    if is_no_sale_sentinel(value) {
        return Ok((0.0, SalesOutcome::Sentinel));
    }

    let parsed = parse_number(value, row, columns::SALES_AMOUNT)?;
    if parsed < 0.0 {
        Ok((0.0, SalesOutcome::Clamped))
    } else {
        Ok((parsed, SalesOutcome::Kept))
    }
}

/// Prices are coerced but never clamped.
pub fn normalize_price(value: &FieldValue, row: usize) -> Result<f64, EngineError> {
    parse_number(value, row, columns::PRODUCT_PRICE)
}

pub fn normalize_monetary(
    events: Vec<TimedEvent>,
) -> Result<(Vec<PricedEvent>, MonetaryReport), EngineError> {
    let mut report = MonetaryReport::default();
    let mut out = Vec::with_capacity(events.len());

    for (row, event) in events.into_iter().enumerate() {
        let (sales_amount, outcome) = normalize_sales_amount(&event.raw.sales_amount, row)?;
        match outcome {
            SalesOutcome::Sentinel => report.sentinel_sales += 1,
            SalesOutcome::Clamped => report.clamped_sales += 1,
            SalesOutcome::Kept => {}
        }
        let price = normalize_price(&event.raw.product_price, row)?;
        out.push(PricedEvent {
            event,
            money: Money {
                sales_amount,
                price,
            },
        });
    }
    report.rows = out.len() as u64;

    if report.clamped_sales > 0 {
        warn!(
            component = "monetary",
            event = "monetary.sales.clamped",
            clamped_sales = report.clamped_sales
        );
    }

    info!(
        component = "monetary",
        event = "monetary.normalize.finish",
        rows = report.rows,
        sentinel_sales = report.sentinel_sales,
        clamped_sales = report.clamped_sales
    );

    Ok((out, report))
}

fn parse_number(value: &FieldValue, row: usize, column: &'static str) -> Result<f64, EngineError> {
    let parsed = match value {
        FieldValue::Int(v) => Some(*v as f64),
        FieldValue::Float(v) => Some(*v),
        FieldValue::Text(raw) => raw.trim().parse::<f64>().ok(),
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(EngineError::MalformedMonetaryValue {
            row,
            column,
            value: value.to_string(),
        }),
    }
}
