use crate::error::PipelineError;
use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

/// Serialize `rows` with a header line. The header comes from the `Tabled`
/// column names, so an empty table still carries it.
pub fn write_csv<T: Serialize + Tabled>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
    if rows.is_empty() {
        wtr.write_record(T::headers().iter().map(|h| h.as_bytes()))
            .map_err(|e| PipelineError::csv(path, e))?;
    }
    for r in rows {
        wtr.serialize(r).map_err(|e| PipelineError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

pub fn write_html(path: &Path, html: &str) -> Result<(), PipelineError> {
    std::fs::write(path, html).map_err(|e| PipelineError::io(path, e))?;
    info!(path = %path.display(), "html fragment saved");
    Ok(())
}

pub fn create_dir(path: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))
}

/// Markdown rendering of the first `max_rows` rows, for console previews.
pub fn render_table_rows<T>(rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(slice).with(Style::markdown()).to_string()
}

pub fn preview_table_rows<T>(title: &str, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}\n", title);
    println!("{}\n", render_table_rows(rows, max_rows));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompletionRateRecord;

    fn record(location: &str) -> CompletionRateRecord {
        CompletionRateRecord {
            location: location.to_string(),
            region: "EUROPE".to_string(),
            country: "France".to_string(),
            activity: "IST".to_string(),
            category: String::new(),
            environment: "50%".to_string(),
            health_safety: "100%".to_string(),
            social: String::new(),
            grand_total: "75%".to_string(),
            year_to_analyze: "2024".to_string(),
        }
    }

    #[test]
    fn markdown_preview_limits_rows() {
        let rows = vec![record("Lyon"), record("Paris")];
        let table = render_table_rows(&rows, 1);
        assert!(table.contains("| Location"));
        assert!(table.contains("Lyon"));
        assert!(!table.contains("Paris"));
        assert_eq!(render_table_rows::<CompletionRateRecord>(&[], 3), "(no rows)");
    }

    #[test]
    fn csv_headers_use_dashboard_column_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rates.csv");
        write_csv(&path, &[record("Lyon")]).expect("csv written");
        let text = std::fs::read_to_string(&path).expect("csv readable");
        assert!(text.starts_with(
            "Location,Region,country,Activity,Category,Environment,Health & Safety,Social,Grand Total,Year to Analyze\n"
        ));
        assert!(text.contains("Lyon,EUROPE,France,IST,,50%,100%,,75%,2024"));
    }

    #[test]
    fn empty_tables_still_get_a_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rates.csv");
        write_csv::<CompletionRateRecord>(&path, &[]).expect("csv written");
        let text = std::fs::read_to_string(&path).expect("csv readable");
        assert_eq!(
            text,
            "Location,Region,country,Activity,Category,Environment,Health & Safety,Social,Grand Total,Year to Analyze\n"
        );

        let countries = dir.path().join("countries.csv");
        write_csv::<crate::types::CountryAverageRow>(&countries, &[]).expect("csv written");
        let text = std::fs::read_to_string(&countries).expect("csv readable");
        assert_eq!(text, "country,Environment,Health & Safety,Social,Grand Total\n");
    }
}
