//! Dense product x date grid built from the sparse product-day aggregate.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::aggregate::ProductDaySales;
use crate::calendar::{CampaignCalendar, TimeOffset};
use crate::catalog::UniqueProductId;
use crate::engine::EngineError;
use crate::events::columns;

pub const GRID_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseGridRow {
    pub unique_product_id: UniqueProductId,
    pub date: NaiveDate,
    pub day_of_campaign: u32,
    pub total_sales_amount: f64,
    pub number_of_clicks: u64,
    pub product_day_index: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridFillReport {
    pub products: u64,
    pub dates: u64,
    pub rows: u64,
    pub zero_filled_rows: u64,
}

#[derive(Debug, Clone)]
pub struct DenseGridFiller<'a> {
    product_ids: Vec<UniqueProductId>,
    dates: Vec<(NaiveDate, u32)>,
    sparse: HashMap<(UniqueProductId, NaiveDate), &'a ProductDaySales>,
}

impl<'a> DenseGridFiller<'a> {
    pub fn new(
        sparse: &'a [ProductDaySales],
        product_ids: impl IntoIterator<Item = UniqueProductId>,
        dates: impl IntoIterator<Item = NaiveDate>,
        calendar: &CampaignCalendar,
    ) -> Result<Self, EngineError> {
        let product_ids: Vec<UniqueProductId> = product_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let dates = dates
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|date| calendar.day_of_campaign(date).map(|day| (date, day)))
            .collect::<Result<Vec<_>, EngineError>>()?;

        let sparse = sparse
            .iter()
            .map(|row| ((row.unique_product_id, row.date), row))
            .collect();

        Ok(Self {
            product_ids,
            dates,
            sparse,
        })
    }

    pub fn product_count(&self) -> usize {
        self.product_ids.len()
    }

    pub fn date_count(&self) -> usize {
        self.dates.len()
    }

    pub fn row_count(&self) -> usize {
        self.product_ids.len() * self.dates.len()
    }

    pub fn rows(&self) -> DenseGridIter<'_, 'a> {
        DenseGridIter {
            filler: self,
            product_pos: 0,
            date_pos: 0,
            next_index: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DenseGridIter<'f, 'a> {
    filler: &'f DenseGridFiller<'a>,
    product_pos: usize,
    date_pos: usize,
    next_index: u64,
}

impl Iterator for DenseGridIter<'_, '_> {
    type Item = DenseGridRow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.filler.dates.is_empty() {
            return None;
        }
        let unique_product_id = *self.filler.product_ids.get(self.product_pos)?;
        let (date, day_of_campaign) = self.filler.dates[self.date_pos];

        self.date_pos += 1;
        if self.date_pos == self.filler.dates.len() {
            self.date_pos = 0;
            self.product_pos += 1;
        }

        let (total_sales_amount, number_of_clicks) = self
            .filler
            .sparse
            .get(&(unique_product_id, date))
            .map(|row| (row.total_sales_amount, row.number_of_clicks))
            .unwrap_or((0.0, 0));

        let product_day_index = self.next_index;
        self.next_index += 1;

        Some(DenseGridRow {
            unique_product_id,
            date,
            day_of_campaign,
            total_sales_amount,
            number_of_clicks,
            product_day_index,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let emitted = (self.next_index - 1) as usize;
        let remaining = self.filler.row_count().saturating_sub(emitted);
        (remaining, Some(remaining))
    }
}

pub fn fill_dense_grid(
    sparse: &[ProductDaySales],
    product_ids: impl IntoIterator<Item = UniqueProductId>,
    dates: impl IntoIterator<Item = NaiveDate>,
    calendar: &CampaignCalendar,
) -> Result<Vec<DenseGridRow>, EngineError> {
    let filler = DenseGridFiller::new(sparse, product_ids, dates, calendar)?;
    let rows: Vec<DenseGridRow> = filler.rows().collect();

    info!(
        component = "grid",
        event = "grid.fill.finish",
        products = filler.product_count(),
        dates = filler.date_count(),
        sparse_rows = sparse.len(),
        rows = rows.len()
    );

    Ok(rows)
}

/// Streams the grid to `sink` in slices of at most `chunk_rows` rows so the
/// full cross product never has to be resident at once.
pub fn fill_dense_grid_chunked<E, F>(
    filler: &DenseGridFiller<'_>,
    chunk_rows: usize,
    mut sink: F,
) -> Result<GridFillReport, E>
where
    E: From<EngineError>,
    F: FnMut(&[DenseGridRow]) -> Result<(), E>,
{
    if chunk_rows == 0 {
        return Err(EngineError::InvalidConfig("chunk_rows must be > 0".to_string()).into());
    }

    let mut report = GridFillReport {
        products: filler.product_count() as u64,
        dates: filler.date_count() as u64,
        ..GridFillReport::default()
    };
    let mut chunk = Vec::with_capacity(chunk_rows.min(filler.row_count()));
    let mut chunks = 0u64;

    for row in filler.rows() {
        if row.number_of_clicks == 0 {
            report.zero_filled_rows += 1;
        }
        chunk.push(row);
        if chunk.len() == chunk_rows {
            sink(&chunk)?;
            report.rows += chunk.len() as u64;
            chunks += 1;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        sink(&chunk)?;
        report.rows += chunk.len() as u64;
        chunks += 1;
    }

    info!(
        component = "grid",
        event = "grid.fill.chunked.finish",
        products = report.products,
        dates = report.dates,
        rows = report.rows,
        zero_filled_rows = report.zero_filled_rows,
        chunks
    );

    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridDType {
    Utf8,
    Date,
    U32,
    U64,
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridColumn {
    pub name: String,
    pub dtype: GridDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<GridColumn>,
}

#[derive(Debug, Error)]
pub enum GridSchemaError {
    #[error("grid schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("grid schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub fn build_grid_schema(schema_version: u32, time_offset: &TimeOffset) -> GridSchema {
    let columns: Vec<GridColumn> = [
        (columns::UNIQUE_PRODUCT_ID, GridDType::Utf8),
        (columns::DATE, GridDType::Date),
        (columns::DAY_OF_CAMPAIGN, GridDType::U32),
        (columns::TOTAL_SALES_AMOUNT, GridDType::F64),
        (columns::NUMBER_OF_CLICKS, GridDType::U64),
        (columns::PRODUCT_DAY_INDEX, GridDType::U64),
    ]
    .into_iter()
    .map(|(name, dtype)| GridColumn {
        name: name.to_string(),
        dtype,
    })
    .collect();

    let fingerprint = schema_fingerprint(schema_version, time_offset, &columns);

    info!(
        component = "grid",
        event = "grid.schema.built",
        version = schema_version,
        offset_minutes = time_offset.total_minutes(),
        column_count = columns.len(),
        fingerprint = %fingerprint
    );

    GridSchema {
        version: schema_version,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &GridSchema,
) -> Result<(), GridSchemaError> {
    if expected_version != actual.version {
        return Err(GridSchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(GridSchemaError::FingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(
    schema_version: u32,
    time_offset: &TimeOffset,
    columns: &[GridColumn],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{schema_version};"));
    hasher.update(format!("offset_minutes:{};", time_offset.total_minutes()));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?};", column.dtype));
    }
    hex::encode(hasher.finalize())
}
