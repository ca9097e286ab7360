//! Product-day sales grid engine.
//!
//! Turns raw per-click advertising events into a dense product x day table:
//! - calendar fields and the shared campaign calendar
//! - product catalog with first-seen surrogate keys
//! - sentinel-aware sales and price cleaning
//! - sparse product-day aggregate and the zero-filled dense grid

mod aggregate;
mod calendar;
mod catalog;
mod engine;
mod events;
mod grid;
mod monetary;
mod observability;
mod split;
mod table_io;

pub use aggregate::{
    aggregate_sales, annotate_events, product_day_id, NormalizedEvent, ProductDaySales,
};
pub use calendar::{
    add_calendar_fields, calendar_fields, parse_click_timestamp, CalendarFields,
    CampaignCalendar, TimeOffset, TimedEvent,
};
pub use catalog::{
    extract_catalog, extract_catalog_from_keys, tokenize_title, ProductCatalog, ProductRecord,
    UniqueProductId,
};
pub use engine::{
    engine_config_from_env, log_run_finish, prepare_product_days, run_engine, EngineConfig,
    EngineError, EngineOutput, EngineReport,
};
pub use events::{check_required_columns, columns, FieldValue, ProductKey, RawEvent};
pub use grid::{
    assert_schema_compatible, build_grid_schema, fill_dense_grid, fill_dense_grid_chunked,
    DenseGridFiller, DenseGridIter, DenseGridRow, GridColumn, GridDType, GridFillReport,
    GridSchema, GridSchemaError, GRID_SCHEMA_VERSION,
};
pub use monetary::{
    is_no_sale_sentinel, normalize_monetary, normalize_price, normalize_sales_amount, Money,
    MonetaryReport, PricedEvent, SalesOutcome, NO_SALE_SENTINELS,
};
pub use observability::{
    env_flag, init_logging, log_app_start, log_io_selected, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use split::{split_by_date, DateSplit};
pub use table_io::{
    read_raw_events, read_raw_events_from_reader, write_catalog, write_catalog_to_writer,
    write_grid, write_rows, write_sparse_sales, GridFileSink, GridSink, TableFormat,
    TableIoError, CRITEO_COLUMNS,
};
