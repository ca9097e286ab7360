use std::env;
use std::path::{Path, PathBuf};

use salesgrid::{
    engine_config_from_env, env_flag, fill_dense_grid_chunked, init_logging, log_app_start,
    log_io_selected, log_run_finish, logging_config_from_env, prepare_product_days,
    read_raw_events, run_engine, write_catalog, write_grid, write_sparse_sales, EngineOutput,
    GridFileSink, TableFormat, TableIoError,
};

const DEFAULT_CHUNK_ROWS: usize = 100_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let input = env::var("SALESGRID_INPUT")
        .map(PathBuf::from)
        .map_err(|_| "SALESGRID_INPUT must point at the raw event table")?;
    let input_format = format_from_env("SALESGRID_INPUT_FORMAT", &input)?;
    let output = env::var("SALESGRID_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("product_day_grid.csv"));
    let output_format = format_from_env("SALESGRID_OUTPUT_FORMAT", &output)?;
    let stream_grid = env_flag("SALESGRID_STREAM_GRID").unwrap_or(false);
    let chunk_rows = env::var("SALESGRID_CHUNK_ROWS")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_CHUNK_ROWS);
    let engine_cfg = engine_config_from_env();

    log_io_selected("input", &input, input_format.as_str(), false);
    let events = read_raw_events(&input, input_format)?;

    log_io_selected("output", &output, output_format.as_str(), stream_grid);
    let result = if stream_grid {
        let mut result = prepare_product_days(events, &engine_cfg)?;
        let fill = {
            let filler = result.grid_filler()?;
            let mut sink = GridFileSink::create(&output, output_format)?;
            let fill = fill_dense_grid_chunked::<TableIoError, _>(&filler, chunk_rows, |chunk| {
                sink.write_chunk(chunk)
            })?;
            sink.finish()?;
            fill
        };
        result.report.grid_rows = fill.rows;
        result.report.zero_filled_rows = fill.zero_filled_rows;
        log_run_finish(&result.report);
        result
    } else {
        let (result, grid) = run_engine(events, &engine_cfg)?;
        write_grid(&output, output_format, &grid)?;
        result
    };

    write_side_tables(&result)?;

    println!(
        "Product-day grid written | output={} rows={} products={} dates={} ({}..{}) schema={}",
        output.display(),
        result.report.grid_rows,
        result.report.distinct_products,
        result.report.distinct_dates,
        result.calendar.first_day(),
        result.calendar.last_day(),
        result.schema.fingerprint
    );

    Ok(())
}

fn write_side_tables(result: &EngineOutput) -> Result<(), TableIoError> {
    if let Ok(path) = env::var("SALESGRID_CATALOG_OUTPUT") {
        let path = PathBuf::from(path);
        let format = format_from_env("SALESGRID_CATALOG_FORMAT", &path)?;
        log_io_selected("catalog", &path, format.as_str(), false);
        write_catalog(&path, format, &result.catalog)?;
    }

    if let Ok(path) = env::var("SALESGRID_SPARSE_OUTPUT") {
        let path = PathBuf::from(path);
        let format = format_from_env("SALESGRID_SPARSE_FORMAT", &path)?;
        log_io_selected("sparse_sales", &path, format.as_str(), false);
        write_sparse_sales(&path, format, &result.product_sales)?;
    }

    Ok(())
}

fn format_from_env(key: &str, path: &Path) -> Result<TableFormat, TableIoError> {
    match env::var(key) {
        Ok(raw) => raw.parse(),
        Err(_) => TableFormat::from_path(path),
    }
}
