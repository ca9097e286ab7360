//! Reading raw event tables and writing engine outputs.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::StringRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::aggregate::ProductDaySales;
use crate::catalog::ProductCatalog;
use crate::engine::EngineError;
use crate::events::{check_required_columns, columns, FieldValue, ProductKey, RawEvent};
use crate::grid::DenseGridRow;

/// Column order of the headerless Criteo Sponsored Search log.
pub const CRITEO_COLUMNS: [&str; 23] = [
    "sale",
    columns::SALES_AMOUNT,
    "time_delay_for_conversion",
    columns::CLICK_TIMESTAMP,
    "nb_clicks_1week",
    columns::PRODUCT_PRICE,
    columns::PRODUCT_AGE_GROUP,
    columns::DEVICE_TYPE,
    columns::AUDIENCE_ID,
    columns::PRODUCT_GENDER,
    columns::PRODUCT_BRAND,
    columns::PRODUCT_CATEGORY_1,
    columns::PRODUCT_CATEGORY_2,
    columns::PRODUCT_CATEGORY_3,
    columns::PRODUCT_CATEGORY_4,
    columns::PRODUCT_CATEGORY_5,
    columns::PRODUCT_CATEGORY_6,
    columns::PRODUCT_CATEGORY_7,
    "product_country",
    columns::PRODUCT_ID,
    columns::PRODUCT_TITLE,
    "partner_id",
    "user_id",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
    CriteoTsv,
    Json,
    JsonLines,
}

impl TableFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::CriteoTsv => "criteo_tsv",
            Self::Json => "json",
            Self::JsonLines => "jsonl",
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, TableIoError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        extension.parse()
    }

    fn delimiter(self) -> Option<u8> {
        match self {
            Self::Csv => Some(b','),
            Self::Tsv | Self::CriteoTsv => Some(b'\t'),
            Self::Json | Self::JsonLines => None,
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableFormat {
    type Err = TableIoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "criteo" | "criteo_tsv" => Ok(Self::CriteoTsv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            other => Err(TableIoError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("{0} is not a supported table format")]
    UnsupportedFormat(String),
    #[error("{0} tables can only be read")]
    ReadOnlyFormat(TableFormat),
    #[error("{0} output cannot be streamed in chunks")]
    NotStreamable(TableFormat),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("record {row} has {found} columns, expected {expected}")]
    InvalidRecordColumns {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("row {row} is not a JSON object")]
    InvalidJsonRow { row: usize },
    #[error("invalid output path: {0}")]
    InvalidOutputPath(String),
}

pub fn read_raw_events(path: &Path, format: TableFormat) -> Result<Vec<RawEvent>, TableIoError> {
    let file = File::open(path)?;
    let events = read_raw_events_from_reader(BufReader::new(file), format)?;

    info!(
        component = "table_io",
        event = "table_io.read.finish",
        path = %path.display(),
        format = format.as_str(),
        rows = events.len()
    );

    Ok(events)
}

pub fn read_raw_events_from_reader<R: Read>(
    reader: R,
    format: TableFormat,
) -> Result<Vec<RawEvent>, TableIoError> {
    match format {
        TableFormat::Csv | TableFormat::Tsv | TableFormat::CriteoTsv => {
            read_delimited(reader, format)
        }
        TableFormat::Json => {
            let rows: Vec<Value> = serde_json::from_reader(reader)?;
            events_from_json_rows(rows)
        }
        TableFormat::JsonLines => {
            let mut rows = Vec::new();
            for line in BufReader::new(reader).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                rows.push(serde_json::from_str(&line)?);
            }
            events_from_json_rows(rows)
        }
    }
}

struct ColumnIndex {
    positions: HashMap<&'static str, usize>,
    width: usize,
}

impl ColumnIndex {
    fn from_header<'a>(header: impl IntoIterator<Item = &'a str>) -> Result<Self, EngineError> {
        let header: Vec<&str> = header.into_iter().map(str::trim).collect();
        check_required_columns(header.iter().copied())?;
        let positions = columns::REQUIRED_COLUMNS
            .iter()
            .filter_map(|name| {
                header
                    .iter()
                    .position(|column| column == name)
                    .map(|idx| (*name, idx))
            })
            .collect();
        Ok(Self {
            positions,
            width: header.len(),
        })
    }

    fn get<'r>(&self, record: &'r StringRecord, column: &'static str) -> &'r str {
        self.positions
            .get(column)
            .and_then(|idx| record.get(*idx))
            .unwrap_or_default()
    }
}

fn read_delimited<R: Read>(reader: R, format: TableFormat) -> Result<Vec<RawEvent>, TableIoError> {
    let has_headers = format != TableFormat::CriteoTsv;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .delimiter(format.delimiter().unwrap_or(b','))
        .from_reader(reader);

    let index = if has_headers {
        ColumnIndex::from_header(reader.headers()?.iter())?
    } else {
        ColumnIndex::from_header(CRITEO_COLUMNS)?
    };

    let mut events = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < index.width {
            return Err(TableIoError::InvalidRecordColumns {
                row,
                found: record.len(),
                expected: index.width,
            });
        }
        events.push(parse_event_record(&index, &record));
    }

    Ok(events)
}

fn parse_event_record(index: &ColumnIndex, record: &StringRecord) -> RawEvent {
    let text = |column: &'static str| index.get(record, column).to_string();
    RawEvent {
        click_timestamp: FieldValue::Text(text(columns::CLICK_TIMESTAMP)),
        product: ProductKey {
            product_id: text(columns::PRODUCT_ID),
            brand: text(columns::PRODUCT_BRAND),
            age_group: text(columns::PRODUCT_AGE_GROUP),
            gender: text(columns::PRODUCT_GENDER),
            categories: columns::PRODUCT_CATEGORIES.map(text),
            title: text(columns::PRODUCT_TITLE),
        },
        sales_amount: FieldValue::Text(text(columns::SALES_AMOUNT)),
        product_price: FieldValue::Text(text(columns::PRODUCT_PRICE)),
        device_type: text(columns::DEVICE_TYPE),
        audience_id: text(columns::AUDIENCE_ID),
    }
}

fn events_from_json_rows(rows: Vec<Value>) -> Result<Vec<RawEvent>, TableIoError> {
    let mut objects = Vec::with_capacity(rows.len());
    for (row, value) in rows.into_iter().enumerate() {
        match value {
            Value::Object(object) => {
                check_required_columns(object.keys().map(String::as_str))?;
                objects.push(object);
            }
            _ => return Err(TableIoError::InvalidJsonRow { row }),
        }
    }

    Ok(objects.iter().map(parse_event_object).collect())
}

fn parse_event_object(object: &Map<String, Value>) -> RawEvent {
    let text = |column: &str| json_text(object.get(column));
    let field = |column: &str| json_field(object.get(column));
    RawEvent {
        click_timestamp: field(columns::CLICK_TIMESTAMP),
        product: ProductKey {
            product_id: text(columns::PRODUCT_ID),
            brand: text(columns::PRODUCT_BRAND),
            age_group: text(columns::PRODUCT_AGE_GROUP),
            gender: text(columns::PRODUCT_GENDER),
            categories: columns::PRODUCT_CATEGORIES.map(text),
            title: text(columns::PRODUCT_TITLE),
        },
        sales_amount: field(columns::SALES_AMOUNT),
        product_price: field(columns::PRODUCT_PRICE),
        device_type: text(columns::DEVICE_TYPE),
        audience_id: text(columns::AUDIENCE_ID),
    }
}

fn json_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn json_field(value: Option<&Value>) -> FieldValue {
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => FieldValue::Int(v),
            None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        other => FieldValue::Text(json_text(other)),
    }
}

pub fn write_grid(
    path: &Path,
    format: TableFormat,
    rows: &[DenseGridRow],
) -> Result<(), TableIoError> {
    write_atomic(path, |writer| write_rows(writer, format, rows))?;
    log_write(path, format, "grid", rows.len());
    Ok(())
}

pub fn write_sparse_sales(
    path: &Path,
    format: TableFormat,
    rows: &[ProductDaySales],
) -> Result<(), TableIoError> {
    write_atomic(path, |writer| write_rows(writer, format, rows))?;
    log_write(path, format, "sparse_sales", rows.len());
    Ok(())
}

pub fn write_catalog(
    path: &Path,
    format: TableFormat,
    catalog: &ProductCatalog,
) -> Result<(), TableIoError> {
    write_atomic(path, |writer| write_catalog_to_writer(writer, format, catalog))?;
    log_write(path, format, "catalog", catalog.len());
    Ok(())
}

fn staging_path(path: &Path) -> Result<PathBuf, TableIoError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| TableIoError::InvalidOutputPath(path.display().to_string()))?;
    Ok(path.with_file_name(format!("{file_name}.tmp")))
}

fn sync_staged(writer: BufWriter<File>) -> Result<(), TableIoError> {
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(())
}

// The target path only ever holds a complete table.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), TableIoError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), TableIoError>,
{
    let tmp_path = staging_path(path)?;
    let staged: Result<(), TableIoError> = File::create(&tmp_path)
        .map_err(TableIoError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            sync_staged(writer)
        });

    match staged {
        Ok(()) => {
            fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

pub fn write_rows<W: Write, T: Serialize>(
    mut writer: W,
    format: TableFormat,
    rows: &[T],
) -> Result<(), TableIoError> {
    match format {
        TableFormat::Csv | TableFormat::Tsv => {
            let mut csv_writer = delimited_writer(writer, format);
            for row in rows {
                csv_writer.serialize(row)?;
            }
            csv_writer.flush()?;
        }
        TableFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, rows)?;
            writer.flush()?;
        }
        TableFormat::JsonLines => {
            for row in rows {
                serde_json::to_writer(&mut writer, row)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        TableFormat::CriteoTsv => return Err(TableIoError::ReadOnlyFormat(format)),
    }
    Ok(())
}

/// Catalog rows widened with one `product_title_part_N` column per title
/// position; missing parts are empty cells or JSON nulls.
pub fn write_catalog_to_writer<W: Write>(
    mut writer: W,
    format: TableFormat,
    catalog: &ProductCatalog,
) -> Result<(), TableIoError> {
    let mut header: Vec<String> = vec![columns::UNIQUE_PRODUCT_ID.to_string()];
    header.extend(columns::PRODUCT_COLUMNS.iter().map(|name| name.to_string()));
    header.extend(catalog.title_part_columns());

    match format {
        TableFormat::Csv | TableFormat::Tsv => {
            let mut csv_writer = delimited_writer(writer, format);
            csv_writer.write_record(&header)?;
            for record in catalog.records() {
                let mut cells: Vec<String> = vec![record.unique_product_id.to_string()];
                cells.extend(record.key.values().into_iter().map(str::to_string));
                cells.extend(
                    record
                        .title_parts
                        .iter()
                        .map(|part| part.clone().unwrap_or_default()),
                );
                csv_writer.write_record(&cells)?;
            }
            csv_writer.flush()?;
        }
        TableFormat::Json | TableFormat::JsonLines => {
            let objects: Vec<Value> = catalog
                .records()
                .iter()
                .map(|record| {
                    let mut values: Vec<Value> =
                        vec![Value::String(record.unique_product_id.to_string())];
                    values.extend(
                        record
                            .key
                            .values()
                            .into_iter()
                            .map(|v| Value::String(v.to_string())),
                    );
                    values.extend(record.title_parts.iter().map(|part| match part {
                        Some(token) => Value::String(token.clone()),
                        None => Value::Null,
                    }));
                    Value::Object(header.iter().cloned().zip(values).collect())
                })
                .collect();
            write_rows(&mut writer, format, &objects)?;
        }
        TableFormat::CriteoTsv => return Err(TableIoError::ReadOnlyFormat(format)),
    }
    Ok(())
}

fn delimited_writer<W: Write>(writer: W, format: TableFormat) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(format.delimiter().unwrap_or(b','))
        .from_writer(writer)
}

fn log_write(path: &Path, format: TableFormat, table: &'static str, rows: usize) {
    info!(
        component = "table_io",
        event = "table_io.write.finish",
        path = %path.display(),
        format = format.as_str(),
        table,
        rows
    );
}

pub enum GridSink<W: Write> {
    Delimited(csv::Writer<W>),
    JsonLines(W),
}

impl<W: Write> GridSink<W> {
    pub fn new(writer: W, format: TableFormat) -> Result<Self, TableIoError> {
        match format {
            TableFormat::Csv | TableFormat::Tsv => {
                Ok(Self::Delimited(delimited_writer(writer, format)))
            }
            TableFormat::JsonLines => Ok(Self::JsonLines(writer)),
            TableFormat::Json | TableFormat::CriteoTsv => Err(TableIoError::NotStreamable(format)),
        }
    }

    pub fn write_chunk(&mut self, rows: &[DenseGridRow]) -> Result<(), TableIoError> {
        match self {
            Self::Delimited(writer) => {
                for row in rows {
                    writer.serialize(row)?;
                }
            }
            Self::JsonLines(writer) => {
                for row in rows {
                    serde_json::to_writer(&mut *writer, row)?;
                    writer.write_all(b"\n")?;
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), TableIoError> {
        self.into_inner().map(|_| ())
    }

    pub fn into_inner(self) -> Result<W, TableIoError> {
        match self {
            Self::Delimited(writer) => writer
                .into_inner()
                .map_err(|err| TableIoError::Io(err.into_error())),
            Self::JsonLines(mut writer) => {
                writer.flush()?;
                Ok(writer)
            }
        }
    }
}

/// Streamed grid output staged next to `path`. The table appears at `path`
/// only when [`GridFileSink::finish`] succeeds; a sink dropped before that
/// removes its staging file.
pub struct GridFileSink {
    sink: Option<GridSink<BufWriter<File>>>,
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl GridFileSink {
    pub fn create(path: &Path, format: TableFormat) -> Result<Self, TableIoError> {
        if !matches!(
            format,
            TableFormat::Csv | TableFormat::Tsv | TableFormat::JsonLines
        ) {
            return Err(TableIoError::NotStreamable(format));
        }
        let staging = staging_path(path)?;
        let file = File::create(&staging)?;
        let sink = GridSink::new(BufWriter::new(file), format)?;
        Ok(Self {
            sink: Some(sink),
            staging,
            target: path.to_path_buf(),
            committed: false,
        })
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn write_chunk(&mut self, rows: &[DenseGridRow]) -> Result<(), TableIoError> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_chunk(rows)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), TableIoError> {
        if let Some(sink) = self.sink.take() {
            sync_staged(sink.into_inner()?)?;
        }
        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for GridFileSink {
    fn drop(&mut self) {
        if !self.committed {
            drop(self.sink.take());
            let _ = fs::remove_file(&self.staging);
        }
    }
}
