use crate::error::{require_file, PipelineError};
use crate::types::CompletionEvent;
use crate::util::parse_f64_safe;
use chrono::Datelike;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const TOTAL_LABEL: &str = "Total";
pub const SITE_HEADER: &str = "Site";
pub const VALID_FREQUENCIES: [&str; 3] = ["month", "quarter", "annual"];

/// Submitted-form counts per site and KPI category.
///
/// Rows and columns are the sites and categories seen in the filtered
/// events, in first-seen order. Totals are derived once from the cell
/// counts; the corner cell is the sum of every count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotMatrix {
    sites: Vec<String>,
    categories: Vec<String>,
    counts: Vec<Vec<u64>>,
    row_totals: Vec<u64>,
    column_totals: Vec<u64>,
    grand_total: u64,
}

impl PivotMatrix {
    /// Count submitted events per (site, category) for `year`, keeping only
    /// month/quarter/annual frequencies.
    pub fn build<I>(events: I, year: Option<i32>) -> Self
    where
        I: IntoIterator<Item = CompletionEvent>,
    {
        let mut sites: Vec<String> = Vec::new();
        let mut categories: Vec<String> = Vec::new();
        let mut site_idx: HashMap<String, usize> = HashMap::new();
        let mut cat_idx: HashMap<String, usize> = HashMap::new();
        let mut hits: Vec<(usize, usize)> = Vec::new();

        for event in events {
            if let Some(year) = year {
                match event.date {
                    Some(date) if date.year() == year => {}
                    _ => continue,
                }
            }
            if !is_valid_frequency(&event.frequency) {
                continue;
            }
            let s = intern(&mut sites, &mut site_idx, &event.site);
            let c = intern(&mut categories, &mut cat_idx, &event.category);
            if let (Some(s), Some(c)) = (s, c) {
                if event.completion.is_submitted() {
                    hits.push((s, c));
                }
            }
        }

        let mut counts = vec![vec![0u64; categories.len()]; sites.len()];
        for (s, c) in hits {
            counts[s][c] += 1;
        }
        Self::from_counts(sites, categories, counts)
    }

    fn from_counts(sites: Vec<String>, categories: Vec<String>, counts: Vec<Vec<u64>>) -> Self {
        let row_totals: Vec<u64> = counts.iter().map(|row| row.iter().sum()).collect();
        let column_totals: Vec<u64> = (0..categories.len())
            .map(|c| counts.iter().map(|row| row[c]).sum())
            .collect();
        let grand_total = row_totals.iter().sum();
        Self {
            sites,
            categories,
            counts,
            row_totals,
            column_totals,
            grand_total,
        }
    }

    pub fn sites(&self) -> &[String] {
        &self.sites
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }

    pub fn count(&self, site: &str, category: &str) -> Option<u64> {
        let s = self.sites.iter().position(|x| x == site)?;
        let c = self.category_index(category)?;
        Some(self.counts[s][c])
    }

    /// Counts for the site at `row`, aligned with `categories()`.
    pub fn row(&self, row: usize) -> &[u64] {
        &self.counts[row]
    }

    pub fn row_total(&self, row: usize) -> u64 {
        self.row_totals[row]
    }

    pub fn column_total(&self, column: usize) -> u64 {
        self.column_totals[column]
    }

    pub fn grand_total(&self) -> u64 {
        self.grand_total
    }

    /// Write as `Completed_Forms_Pivot.csv`: one row per site, a `Total`
    /// column, and a trailing `Total` row.
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
        let header = std::iter::once(SITE_HEADER)
            .chain(self.categories.iter().map(String::as_str))
            .chain(std::iter::once(TOTAL_LABEL));
        wtr.write_record(header)
            .map_err(|e| PipelineError::csv(path, e))?;

        for (i, site) in self.sites.iter().enumerate() {
            let cells = std::iter::once(site.clone())
                .chain(self.counts[i].iter().map(u64::to_string))
                .chain(std::iter::once(self.row_totals[i].to_string()));
            wtr.write_record(cells)
                .map_err(|e| PipelineError::csv(path, e))?;
        }

        let totals = std::iter::once(TOTAL_LABEL.to_string())
            .chain(self.column_totals.iter().map(u64::to_string))
            .chain(std::iter::once(self.grand_total.to_string()));
        wtr.write_record(totals)
            .map_err(|e| PipelineError::csv(path, e))?;
        wtr.flush().map_err(|e| PipelineError::io(path, e))?;
        info!(
            path = %path.display(),
            sites = self.sites.len(),
            submitted = self.grand_total,
            "pivot table saved"
        );
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        require_file(path)?;
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_reader(file).map_err(|e| PipelineError::csv(path, e))
    }

    /// Parse a pivot file. The first column holds the site; a trailing
    /// `Total` column and `Total` row are recomputed rather than trusted.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let mut categories: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        if categories.last().map(String::as_str) == Some(TOTAL_LABEL) {
            categories.pop();
        }

        let mut rows: Vec<(String, Vec<u64>)> = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let site = record.get(0).unwrap_or_default().trim().to_string();
            let counts = (0..categories.len())
                .map(|c| count_cell(record.get(c + 1)))
                .collect();
            rows.push((site, counts));
        }
        if rows.last().map(|(site, _)| site.as_str()) == Some(TOTAL_LABEL) {
            rows.pop();
        }

        let (sites, counts) = rows.into_iter().unzip();
        Ok(Self::from_counts(sites, categories, counts))
    }
}

fn is_valid_frequency(frequency: &str) -> bool {
    let lower = frequency.trim().to_lowercase();
    VALID_FREQUENCIES.contains(&lower.as_str())
}

fn intern(values: &mut Vec<String>, index: &mut HashMap<String, usize>, key: &str) -> Option<usize> {
    if key.is_empty() {
        return None;
    }
    if let Some(&i) = index.get(key) {
        return Some(i);
    }
    index.insert(key.to_string(), values.len());
    values.push(key.to_string());
    Some(values.len() - 1)
}

fn count_cell(cell: Option<&str>) -> u64 {
    match parse_f64_safe(cell) {
        Some(v) if v >= 0.0 => v.round() as u64,
        Some(v) => {
            warn!(value = v, "negative count in pivot file treated as zero");
            0
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Completion;
    use chrono::NaiveDate;

    fn event(site: &str, date: &str, freq: &str, cat: &str, completion: Completion) -> CompletionEvent {
        CompletionEvent {
            site: site.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            frequency: freq.to_string(),
            category: cat.to_string(),
            completion,
        }
    }

    fn sample() -> Vec<CompletionEvent> {
        vec![
            event("Paris", "2024-01-31", "Month", "Environment", Completion::Submitted),
            event("Paris", "2024-02-29", "month", "Environment", Completion::Submitted),
            event("Paris", "2024-03-31", "Quarter", "Social", Completion::NotSubmitted),
            event("Lyon", "2024-01-31", "Month", "Health & Safety", Completion::Submitted),
            event("Lyon", "2024-01-31", "Weekly", "Environment", Completion::Submitted),
            event("Dubai", "2024-05-31", "ANNUAL", "Social", Completion::Other("?".into())),
            event("Rome", "2023-05-31", "Month", "Environment", Completion::Submitted),
            event("Oslo", "not a date", "Month", "Environment", Completion::Submitted),
        ]
    }

    #[test]
    fn counts_submitted_events_for_the_year() {
        let pivot = PivotMatrix::build(sample(), Some(2024));
        assert_eq!(pivot.sites(), ["Paris", "Lyon", "Dubai"]);
        assert_eq!(pivot.categories(), ["Environment", "Social", "Health & Safety"]);
        assert_eq!(pivot.count("Paris", "Environment"), Some(2));
        assert_eq!(pivot.count("Lyon", "Environment"), Some(0));
        assert_eq!(pivot.count("Lyon", "Health & Safety"), Some(1));
    }

    #[test]
    fn reindexing_keeps_sites_without_submissions() {
        let pivot = PivotMatrix::build(sample(), Some(2024));
        for site in ["Paris", "Lyon", "Dubai"] {
            for category in pivot.categories() {
                assert!(pivot.count(site, category).is_some(), "{site}/{category}");
            }
        }
        let dubai = pivot.sites().iter().position(|s| s == "Dubai").expect("dubai row");
        assert_eq!(pivot.row_total(dubai), 0);
    }

    #[test]
    fn no_year_keeps_undated_rows() {
        let pivot = PivotMatrix::build(sample(), None);
        assert_eq!(pivot.count("Rome", "Environment"), Some(1));
        assert_eq!(pivot.count("Oslo", "Environment"), Some(1));
    }

    #[test]
    fn totals_are_consistent() {
        let pivot = PivotMatrix::build(sample(), Some(2024));
        let env = pivot.category_index("Environment").expect("environment column");
        assert_eq!(pivot.column_total(env), 2);
        assert_eq!(pivot.row_total(0), 2);
        assert_eq!(pivot.grand_total(), 3);
        let rows: u64 = (0..pivot.sites().len()).map(|r| pivot.row_total(r)).sum();
        let cols: u64 = (0..pivot.categories().len()).map(|c| pivot.column_total(c)).sum();
        assert_eq!(rows, pivot.grand_total());
        assert_eq!(cols, pivot.grand_total());
    }

    #[test]
    fn file_round_trip_preserves_counts() {
        let pivot = PivotMatrix::build(sample(), Some(2024));
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Completed_Forms_Pivot.csv");
        pivot.write(&path).expect("pivot written");
        let reread = PivotMatrix::read(&path).expect("pivot read");
        assert_eq!(reread, pivot);
    }

    #[test]
    fn reads_float_formatted_counts() {
        let csv = ",Environment,Social,Total\nParis,3.0,1,4\nTotal,3,1,4\n";
        let pivot = PivotMatrix::from_reader(csv.as_bytes()).expect("pivot parse");
        assert_eq!(pivot.sites(), ["Paris"]);
        assert_eq!(pivot.count("Paris", "Environment"), Some(3));
        assert_eq!(pivot.grand_total(), 4);
    }
}
