use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedTable;
use crate::types::DateCaseRecord;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::warn;

/// Label variants the upstream has emitted for the two columns we keep.
/// "datat1" is a historical typo for "data1"; both map to n_cases.
const DATE_LABEL: &str = "x";
const CASES_LABELS: [&str; 2] = ["data1", "datat1"];

/// Date formats observed in published by-date payloads.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%b %d %Y"];

/// One sub-array of the chart-interchange payload: a row label followed by
/// that row's values. Parsing into this named shape up front lets the
/// mapping step validate lengths and labels instead of trusting positions.
#[derive(Debug, Clone)]
struct RawColumn {
    label: String,
    values: Vec<Value>,
}

/// Normalize a by-date payload (report-date and onset-date series share this
/// shape): `data.columns` holds parallel arrays, each starting with a label.
/// The labeled arrays become the `date` and `n_cases` columns.
pub fn normalize(series: &str, payload: &Value) -> Result<NormalizedTable<DateCaseRecord>> {
    let columns = payload
        .get("data")
        .and_then(|data| data.get("columns"))
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::schema(series, "payload has no data.columns array"))?;

    if columns.is_empty() {
        return Ok(NormalizedTable::new(Vec::new()));
    }

    let mut warnings = Vec::new();
    let mut date_column: Option<RawColumn> = None;
    let mut cases_column: Option<RawColumn> = None;

    for raw in columns {
        let column = parse_column(series, raw)?;
        if column.label == DATE_LABEL {
            if date_column.is_some() {
                return Err(PipelineError::schema(series, "duplicate date column"));
            }
            date_column = Some(column);
        } else if CASES_LABELS.contains(&column.label.as_str()) {
            if cases_column.is_some() {
                return Err(PipelineError::schema(series, "duplicate n_cases column"));
            }
            cases_column = Some(column);
        } else {
            let message = format!("skipping column with unrecognized label '{}'", column.label);
            warn!("{series}: {message}");
            warnings.push(message);
        }
    }

    let date_column =
        date_column.ok_or_else(|| PipelineError::schema(series, "no date column labeled 'x'"))?;
    let cases_column = cases_column.ok_or_else(|| {
        PipelineError::schema(series, "no n_cases column labeled 'data1' or 'datat1'")
    })?;

    if date_column.values.len() != cases_column.values.len() {
        return Err(PipelineError::schema(
            series,
            format!(
                "column length mismatch: {} dates vs {} counts",
                date_column.values.len(),
                cases_column.values.len()
            ),
        ));
    }

    let mut records = Vec::with_capacity(date_column.values.len());
    for (date_value, cases_value) in date_column.values.iter().zip(cases_column.values.iter()) {
        records.push(DateCaseRecord {
            date: parse_date(series, date_value)?,
            n_cases: parse_count(series, cases_value)?,
        });
    }

    Ok(NormalizedTable { records, warnings })
}

/// Validate one sub-array: non-empty, led by a string label.
fn parse_column(series: &str, raw: &Value) -> Result<RawColumn> {
    let cells = raw
        .as_array()
        .ok_or_else(|| PipelineError::schema(series, "columns entry is not an array"))?;
    let label = cells
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::schema(series, "columns entry has no leading string label"))?;

    Ok(RawColumn {
        label: label.to_string(),
        values: cells[1..].to_vec(),
    })
}

fn parse_date(series: &str, value: &Value) -> Result<NaiveDate> {
    let text = value
        .as_str()
        .ok_or_else(|| PipelineError::schema(series, format!("non-string date value {value}")))?;

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .ok_or_else(|| PipelineError::schema(series, format!("unparseable date '{text}'")))
}

fn parse_count(series: &str, value: &Value) -> Result<i64> {
    let count = match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| PipelineError::schema(series, format!("non-integer count {n}")))?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            PipelineError::schema(series, format!("unparseable count '{s}'"))
        })?,
        other => {
            return Err(PipelineError::schema(
                series,
                format!("unexpected count value {other}"),
            ))
        }
    };

    if count < 0 {
        return Err(PipelineError::schema(
            series,
            format!("negative count {count}"),
        ));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SERIES: &str = "cdc_cases_by_report_date";

    #[test]
    fn test_normalize_transposes_columns() {
        let payload = json!({
            "data": {
                "columns": [
                    ["x", "2020-03-01", "2020-03-02", "2020-03-03"],
                    ["data1", 3, 18, 24]
                ]
            }
        });

        let table = normalize(SERIES, &payload).unwrap();

        assert_eq!(table.records.len(), 3);
        assert_eq!(
            table.records[0],
            DateCaseRecord {
                date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
                n_cases: 3
            }
        );
        assert_eq!(table.records[2].n_cases, 24);
    }

    #[test]
    fn test_both_cases_aliases_produce_the_same_table() {
        let with_data1 = json!({
            "data": { "columns": [["x", "2020-03-01"], ["data1", 7]] }
        });
        let with_datat1 = json!({
            "data": { "columns": [["x", "2020-03-01"], ["datat1", 7]] }
        });

        let first = normalize(SERIES, &with_data1).unwrap();
        let second = normalize(SERIES, &with_datat1).unwrap();

        assert_eq!(first.records, second.records);
        assert_eq!(first.records[0].n_cases, 7);
    }

    #[test]
    fn test_empty_columns_yield_empty_table() {
        let payload = json!({ "data": { "columns": [] } });
        let table = normalize(SERIES, &payload).unwrap();
        assert!(table.records.is_empty());
    }

    #[test]
    fn test_unrecognized_label_is_skipped_with_warning() {
        let payload = json!({
            "data": {
                "columns": [
                    ["x", "2020-03-01"],
                    ["data1", 5],
                    ["data2", 9]
                ]
            }
        });

        let table = normalize(SERIES, &payload).unwrap();

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.warnings.len(), 1);
        assert!(table.warnings[0].contains("data2"));
    }

    #[test]
    fn test_length_mismatch_is_schema_error() {
        let payload = json!({
            "data": { "columns": [["x", "2020-03-01", "2020-03-02"], ["data1", 5]] }
        });

        assert!(matches!(
            normalize(SERIES, &payload).unwrap_err(),
            PipelineError::Schema { .. }
        ));
    }

    #[test]
    fn test_missing_cases_column_is_schema_error() {
        let payload = json!({
            "data": { "columns": [["x", "2020-03-01"]] }
        });

        assert!(matches!(
            normalize(SERIES, &payload).unwrap_err(),
            PipelineError::Schema { .. }
        ));
    }

    #[test]
    fn test_slash_separated_dates_parse() {
        let payload = json!({
            "data": { "columns": [["x", "3/1/2020"], ["data1", "12"]] }
        });

        let table = normalize(SERIES, &payload).unwrap();
        assert_eq!(
            table.records[0].date,
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
        );
        assert_eq!(table.records[0].n_cases, 12);
    }
}
