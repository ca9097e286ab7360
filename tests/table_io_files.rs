use std::fs;
use std::path::Path;

use salesgrid::{
    columns, fill_dense_grid_chunked, prepare_product_days, read_raw_events, run_engine,
    split_by_date, write_catalog, write_grid, DenseGridRow, EngineConfig, EngineError,
    GridFileSink, TableFormat, TableIoError, TimeOffset, GRID_SCHEMA_VERSION,
};
use tempfile::tempdir;

// 2024-06-01T08:00:00Z, 2024-06-02T08:00:00Z, 2024-06-04T08:00:00Z
const DAY_1: i64 = 1_717_228_800;
const DAY_2: i64 = DAY_1 + 86_400;
const DAY_4: i64 = DAY_1 + 3 * 86_400;

fn utc_config() -> EngineConfig {
    EngineConfig {
        time_offset: TimeOffset::hours(0),
        schema_version: GRID_SCHEMA_VERSION,
    }
}

fn csv_line(timestamp: &str, product_id: &str, title: &str, sales: &str, price: &str) -> String {
    columns::REQUIRED_COLUMNS
        .iter()
        .map(|column| match *column {
            columns::CLICK_TIMESTAMP => timestamp.to_string(),
            columns::PRODUCT_ID => product_id.to_string(),
            columns::PRODUCT_TITLE => title.to_string(),
            columns::SALES_AMOUNT => sales.to_string(),
            columns::PRODUCT_PRICE => price.to_string(),
            columns::PRODUCT_BRAND => "acme".to_string(),
            other => format!("{other}-x"),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn write_feed(path: &Path) {
    let lines = [
        columns::REQUIRED_COLUMNS.join(","),
        csv_line(&DAY_1.to_string(), "A1", "garden hose 20m", "24.5", "24.5"),
        csv_line(&DAY_1.to_string(), "A1", "garden hose 20m", "-1", "24.5"),
        csv_line(&DAY_2.to_string(), "B7", "trowel", "-1.0", "8"),
        csv_line(&DAY_4.to_string(), "C3", "", "\"\"\"-1\"\"\"", "3.2"),
        csv_line(&DAY_4.to_string(), "A1", "garden hose 20m", "24.5", "24.5"),
    ];
    fs::write(path, lines.join("\n") + "\n").expect("feed should be written");
}

#[test]
fn csv_feed_runs_end_to_end() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    write_feed(&feed);

    let events = read_raw_events(&feed, TableFormat::Csv).expect("feed parses");
    assert_eq!(events.len(), 5);

    let (output, grid) = run_engine(events, &utc_config()).expect("engine runs");
    assert_eq!(output.catalog.len(), 3);
    assert_eq!(output.calendar.len(), 3);
    assert_eq!(grid.len(), 9);
    assert_eq!(output.report.monetary.sentinel_sales, 3);

    let a1_day1 = grid
        .iter()
        .find(|row| row.unique_product_id.get() == 1 && row.day_of_campaign == 0)
        .expect("A1 day one");
    assert_eq!(a1_day1.total_sales_amount, 24.5);
    assert_eq!(a1_day1.number_of_clicks, 2);

    // The 2024-06-03 gap is never observed, so day 4 sits at offset 3.
    let offsets: Vec<u32> = output
        .calendar
        .dates()
        .map(|d| output.calendar.day_of_campaign(d).unwrap())
        .collect();
    assert_eq!(offsets, vec![0, 1, 3]);
}

#[test]
fn grid_and_catalog_files_carry_expected_columns() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    write_feed(&feed);
    let events = read_raw_events(&feed, TableFormat::Csv).expect("feed parses");
    let (output, grid) = run_engine(events, &utc_config()).expect("engine runs");

    let grid_path = dir.path().join("grid.csv");
    write_grid(&grid_path, TableFormat::Csv, &grid).expect("grid written");
    let grid_body = fs::read_to_string(&grid_path).expect("grid readable");
    let mut lines = grid_body.lines();
    assert_eq!(
        lines.next(),
        Some("unique_product_id,date,day_of_campaign,total_sales_amount,number_of_clicks,product_day_index")
    );
    assert_eq!(lines.next(), Some("1,2024-06-01,0,24.5,2,1"));
    assert_eq!(grid_body.lines().count(), grid.len() + 1);

    let catalog_path = dir.path().join("catalog.tsv");
    write_catalog(&catalog_path, TableFormat::Tsv, &output.catalog).expect("catalog written");
    let catalog_body = fs::read_to_string(&catalog_path).expect("catalog readable");
    let header: Vec<&str> = catalog_body
        .lines()
        .next()
        .expect("header line")
        .split('\t')
        .collect();
    assert_eq!(header[0], columns::UNIQUE_PRODUCT_ID);
    assert_eq!(header.len(), 1 + columns::PRODUCT_COLUMNS.len() + 3);
    assert_eq!(header.last(), Some(&"product_title_part_2"));

    let trowel: Vec<&str> = catalog_body
        .lines()
        .nth(2)
        .expect("second product")
        .split('\t')
        .collect();
    assert_eq!(trowel[0], "2");
    assert_eq!(trowel[trowel.len() - 3..], ["trowel", "", ""]);
}

#[test]
fn streamed_grid_matches_eager_grid_file() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    write_feed(&feed);

    let events = read_raw_events(&feed, TableFormat::Csv).expect("feed parses");
    let (_output, grid) = run_engine(events.clone(), &utc_config()).expect("eager run");
    let eager_path = dir.path().join("eager.jsonl");
    write_grid(&eager_path, TableFormat::JsonLines, &grid).expect("eager written");

    let prepared = prepare_product_days(events, &utc_config()).expect("prepared");
    let filler = prepared.grid_filler().expect("filler");
    let streamed_path = dir.path().join("streamed.jsonl");
    let mut sink = GridFileSink::create(&streamed_path, TableFormat::JsonLines).expect("sink");
    let report = fill_dense_grid_chunked::<TableIoError, _>(&filler, 2, |chunk| {
        sink.write_chunk(chunk)
    })
    .expect("streamed");
    sink.finish().expect("sink flushed");

    assert_eq!(report.rows, 9);
    assert_eq!(
        fs::read_to_string(&eager_path).unwrap(),
        fs::read_to_string(&streamed_path).unwrap()
    );

    let parsed: Vec<DenseGridRow> = fs::read_to_string(&streamed_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("row parses"))
        .collect();
    assert_eq!(parsed, grid);
}

#[test]
fn split_keeps_every_grid_row() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    write_feed(&feed);
    let events = read_raw_events(&feed, TableFormat::Csv).expect("feed parses");
    let (_output, grid) = run_engine(events, &utc_config()).expect("engine runs");

    let total = grid.len();
    let split = split_by_date(grid, 1, 1);
    assert_eq!(split.test.len(), 3);
    assert!(split.validation.is_empty());
    assert_eq!(split.train.len(), 6);
    assert_eq!(
        split.train.len() + split.validation.len() + split.test.len(),
        total
    );
}

#[test]
fn schema_error_surfaces_before_any_stage() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    fs::write(&feed, "click_timestamp,product_id,sales_amount\n1,a,2\n").unwrap();

    let err = read_raw_events(&feed, TableFormat::Csv).expect_err("schema error");
    assert!(matches!(
        err,
        TableIoError::Engine(EngineError::Schema { .. })
    ));
}

#[test]
fn overflowing_sales_amount_aborts_the_run() {
    let dir = tempdir().expect("temp dir should be created");
    let feed = dir.path().join("feed.csv");
    let lines = [
        columns::REQUIRED_COLUMNS.join(","),
        csv_line(&DAY_1.to_string(), "A1", "hose", "12", "12"),
        csv_line(&DAY_2.to_string(), "A1", "hose", "1e400", "12"),
    ];
    fs::write(&feed, lines.join("\n") + "\n").unwrap();

    let events = read_raw_events(&feed, TableFormat::Csv).expect("feed parses");
    let err = run_engine(events, &utc_config()).expect_err("infinite sales must fail");
    assert!(matches!(
        err,
        EngineError::MalformedMonetaryValue { row: 1, .. }
    ));
}
