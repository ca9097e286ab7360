//! Per-event annotation and the sparse product-day aggregate.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calendar::CampaignCalendar;
use crate::catalog::{ProductCatalog, UniqueProductId};
use crate::engine::EngineError;
use crate::events::ProductKey;
use crate::monetary::PricedEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub unique_product_id: UniqueProductId,
    pub product: ProductKey,
    pub hour: u32,
    pub date: NaiveDate,
    pub month: u32,
    pub week: u32,
    pub day_of_campaign: u32,
    pub sales_amount: f64,
    pub price: f64,
    pub device_type: String,
    pub audience_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDaySales {
    pub unique_product_id: UniqueProductId,
    pub date: NaiveDate,
    pub total_sales_amount: f64,
    pub number_of_clicks: u64,
    pub product_day_id: String,
    pub product_day_index: u64,
}

pub fn product_day_id(id: UniqueProductId, date: NaiveDate) -> String {
    format!("{id}_{}", date.format("%Y-%m-%d"))
}

pub fn annotate_events(
    events: Vec<PricedEvent>,
    catalog: &ProductCatalog,
    calendar: &CampaignCalendar,
) -> Result<Vec<NormalizedEvent>, EngineError> {
    let mut out = Vec::with_capacity(events.len());
    for (row, PricedEvent { event, money }) in events.into_iter().enumerate() {
        let unique_product_id = catalog
            .resolve(&event.raw.product)
            .ok_or(EngineError::UnknownProduct { row })?;
        let day_of_campaign = calendar.day_of_campaign(event.calendar.date)?;

        out.push(NormalizedEvent {
            unique_product_id,
            product: event.raw.product,
            hour: event.calendar.hour,
            date: event.calendar.date,
            month: event.calendar.month,
            week: event.calendar.week,
            day_of_campaign,
            sales_amount: money.sales_amount,
            price: money.price,
            device_type: event.raw.device_type,
            audience_id: event.raw.audience_id,
        });
    }

    Ok(out)
}

/// Sums sales and counts events per (product, date). Every event counts as a
/// click, zero-sale ones included.
pub fn aggregate_sales(events: &[NormalizedEvent]) -> Vec<ProductDaySales> {
    let mut groups: BTreeMap<(NaiveDate, UniqueProductId), (f64, u64)> = BTreeMap::new();
    for event in events {
        let entry = groups
            .entry((event.date, event.unique_product_id))
            .or_insert((0.0, 0));
        entry.0 += event.sales_amount;
        entry.1 += 1;
    }

    let rows: Vec<ProductDaySales> = groups
        .into_iter()
        .enumerate()
        .map(
            |(position, ((date, unique_product_id), (total_sales_amount, number_of_clicks)))| {
                ProductDaySales {
                    unique_product_id,
                    date,
                    total_sales_amount,
                    number_of_clicks,
                    product_day_id: product_day_id(unique_product_id, date),
                    product_day_index: position as u64 + 1,
                }
            },
        )
        .collect();

    info!(
        component = "aggregate",
        event = "aggregate.sales.finish",
        events = events.len(),
        product_days = rows.len()
    );

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn id(value: u32) -> UniqueProductId {
        UniqueProductId::new(value).expect("positive id")
    }

    fn event(product: u32, day: u32, sales_amount: f64) -> NormalizedEvent {
        NormalizedEvent {
            unique_product_id: id(product),
            product: ProductKey {
                product_id: format!("p{product}"),
                brand: String::new(),
                age_group: String::new(),
                gender: String::new(),
                categories: Default::default(),
                title: String::new(),
            },
            hour: 0,
            date: date(day),
            month: 1,
            week: 1,
            day_of_campaign: day - 1,
            sales_amount,
            price: 1.0,
            device_type: String::new(),
            audience_id: String::new(),
        }
    }

    #[test]
    fn sums_sales_and_counts_every_event_as_a_click() {
        let events = vec![
            event(1, 1, 10.0),
            event(1, 1, 0.0),
            event(2, 1, 5.0),
            event(1, 2, 0.0),
            event(1, 1, 2.5),
        ];
        let rows = aggregate_sales(&events);

        assert_eq!(rows.len(), 3);
        let p1_d1 = rows
            .iter()
            .find(|row| row.product_day_id == "1_2024-01-01")
            .expect("p1 day 1 row");
        assert_eq!(p1_d1.total_sales_amount, 12.5);
        assert_eq!(p1_d1.number_of_clicks, 3);

        let p1_d2 = rows
            .iter()
            .find(|row| row.product_day_id == "1_2024-01-02")
            .expect("p1 day 2 row");
        assert_eq!(p1_d2.total_sales_amount, 0.0);
        assert_eq!(p1_d2.number_of_clicks, 1);

        assert!(rows.iter().all(|row| row.number_of_clicks >= 1));
    }

    #[test]
    fn sparse_index_is_dense_and_one_based() {
        let events = vec![event(3, 2, 1.0), event(1, 1, 1.0), event(2, 3, 1.0)];
        let rows = aggregate_sales(&events);
        let indices: Vec<u64> = rows.iter().map(|row| row.product_day_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn composite_key_uses_iso_date() {
        assert_eq!(product_day_id(id(42), date(9)), "42_2024-01-09");
    }
}
