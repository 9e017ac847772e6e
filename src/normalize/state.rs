use crate::constants::CASES_BY_STATE_SERIES;
use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedTable;
use crate::types::StateCaseRecord;
use serde_json::Value;
use tracing::warn;

// Upstream column labels. The community-transmission header has carried a
// corrupted trailing byte in published payloads, so it is matched by prefix.
const STATE_LABEL: &str = "Jurisdiction";
const RANGE_LABEL: &str = "Range";
const CASES_LABEL: &str = "Cases Reported";
const COMMUNITY_SPREAD_PREFIX: &str = "Community Transmission";
const URL_LABEL: &str = "URL";

/// Placeholder the upstream emits where a jurisdiction has no count.
const MISSING_PLACEHOLDER: &str = "None";

/// Normalize the by-state payload: rows live in the payload's `data` array,
/// upstream labels map to {state, range, n_cases, community_spread, url},
/// and the literal string "None" coerces to a missing count.
pub fn normalize(payload: &Value) -> Result<NormalizedTable<StateCaseRecord>> {
    let rows = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::schema(CASES_BY_STATE_SERIES, "payload has no data array"))?;

    let mut records = Vec::with_capacity(rows.len());
    let mut warnings = Vec::new();

    for row in rows {
        let state = required_field(row, STATE_LABEL)?;
        let range = required_field(row, RANGE_LABEL)?;
        let community_spread = prefix_field(row, COMMUNITY_SPREAD_PREFIX)?;
        let url = required_field(row, URL_LABEL)?;
        let n_cases = parse_case_count(row, &state, &mut warnings)?;

        records.push(StateCaseRecord {
            state,
            range,
            n_cases,
            community_spread,
            url,
        });
    }

    Ok(NormalizedTable { records, warnings })
}

fn required_field(row: &Value, label: &str) -> Result<String> {
    row.get(label)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            PipelineError::schema(CASES_BY_STATE_SERIES, format!("row missing field '{label}'"))
        })
}

/// Look a field up by exact label first, then by prefix. The prefix match
/// absorbs the encoding artifact in the upstream header.
fn prefix_field(row: &Value, prefix: &str) -> Result<String> {
    let obj = row.as_object().ok_or_else(|| {
        PipelineError::schema(CASES_BY_STATE_SERIES, "data row is not an object")
    })?;

    if let Some(value) = obj.get(prefix).and_then(Value::as_str) {
        return Ok(value.to_string());
    }

    obj.iter()
        .find(|(key, _)| key.starts_with(prefix))
        .and_then(|(_, value)| value.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            PipelineError::schema(
                CASES_BY_STATE_SERIES,
                format!("row missing field with prefix '{prefix}'"),
            )
        })
}

fn parse_case_count(
    row: &Value,
    state: &str,
    warnings: &mut Vec<String>,
) -> Result<Option<f64>> {
    let raw = row.get(CASES_LABEL).ok_or_else(|| {
        PipelineError::schema(
            CASES_BY_STATE_SERIES,
            format!("row missing field '{CASES_LABEL}'"),
        )
    })?;

    let count = match raw {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s == MISSING_PLACEHOLDER => {
            let message = format!("{state}: placeholder '{MISSING_PLACEHOLDER}' coerced to missing");
            warn!("{message}");
            warnings.push(message);
            None
        }
        Value::String(s) => Some(s.trim().parse::<f64>().map_err(|_| {
            PipelineError::schema(
                CASES_BY_STATE_SERIES,
                format!("{state}: unparseable case count '{s}'"),
            )
        })?),
        other => {
            return Err(PipelineError::schema(
                CASES_BY_STATE_SERIES,
                format!("{state}: unexpected case count value {other}"),
            ))
        }
    };

    if let Some(n) = count {
        if n < 0.0 {
            return Err(PipelineError::schema(
                CASES_BY_STATE_SERIES,
                format!("{state}: negative case count {n}"),
            ));
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "data": [
                {
                    "Jurisdiction": "Washington",
                    "Range": "101 to 500",
                    "Cases Reported": 366,
                    "Community Transmission\u{fffd}": "Yes",
                    "URL": "https://www.doh.wa.gov/emergencies/coronavirus"
                },
                {
                    "Jurisdiction": "Wyoming",
                    "Range": "None",
                    "Cases Reported": "None",
                    "Community Transmission\u{fffd}": "No",
                    "URL": "https://health.wyo.gov/"
                }
            ]
        })
    }

    #[test]
    fn test_normalize_maps_upstream_labels() {
        let table = normalize(&sample_payload()).unwrap();

        assert_eq!(table.records.len(), 2);
        let washington = &table.records[0];
        assert_eq!(washington.state, "Washington");
        assert_eq!(washington.range, "101 to 500");
        assert_eq!(washington.n_cases, Some(366.0));
        assert_eq!(washington.community_spread, "Yes");
        assert_eq!(washington.url, "https://www.doh.wa.gov/emergencies/coronavirus");
    }

    #[test]
    fn test_none_placeholder_coerces_to_missing_with_warning() {
        let table = normalize(&sample_payload()).unwrap();

        let wyoming = &table.records[1];
        assert_eq!(wyoming.n_cases, None);
        assert_eq!(table.warnings.len(), 1);
        assert!(table.warnings[0].contains("Wyoming"));
    }

    #[test]
    fn test_every_count_is_nonnegative_or_missing() {
        let table = normalize(&sample_payload()).unwrap();
        assert!(table
            .records
            .iter()
            .all(|r| r.n_cases.map_or(true, |n| n >= 0.0)));
    }

    #[test]
    fn test_corrupted_header_matches_by_prefix() {
        let payload = json!({
            "data": [{
                "Jurisdiction": "Oregon",
                "Range": "51 to 100",
                "Cases Reported": "75",
                "Community Transmission\u{fffd}\u{fffd}": "Undetermined",
                "URL": "https://www.oregon.gov/oha"
            }]
        });

        let table = normalize(&payload).unwrap();
        assert_eq!(table.records[0].community_spread, "Undetermined");
        assert_eq!(table.records[0].n_cases, Some(75.0));
    }

    #[test]
    fn test_empty_data_array_yields_empty_table() {
        let table = normalize(&json!({ "data": [] })).unwrap();
        assert!(table.records.is_empty());
        assert!(table.warnings.is_empty());
    }

    #[test]
    fn test_missing_data_field_is_schema_error() {
        let err = normalize(&json!({ "rows": [] })).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[test]
    fn test_negative_count_is_schema_error() {
        let payload = json!({
            "data": [{
                "Jurisdiction": "Idaho",
                "Range": "1 to 50",
                "Cases Reported": -3,
                "Community Transmission\u{fffd}": "No",
                "URL": "https://healthandwelfare.idaho.gov/"
            }]
        });

        assert!(matches!(
            normalize(&payload).unwrap_err(),
            PipelineError::Schema { .. }
        ));
    }
}
