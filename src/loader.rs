use crate::error::{require_file, PipelineError};
use crate::types::{Completion, CompletionEvent, SiteReference};
use crate::util::parse_date_safe;
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const SITE_COLUMNS: [&str; 2] = ["Location", "Site"];
pub const DATE_COLUMN: &str = "Date";
pub const FREQUENCY_COLUMN: &str = "Frequency";
pub const CATEGORY_COLUMN: &str = "KPI Category";
pub const COMPLETION_COLUMN: &str = "Completion";

const REFERENCE_SITE: &[&str] = &["Site", "Location"];
const REFERENCE_REGION: &[&str] = &["Region"];
const REFERENCE_COUNTRY: &[&str] = &["country", "Country"];
const REFERENCE_ACTIVITY: &[&str] = &["Activity"];
const REFERENCE_CATEGORY: &[&str] = &["Category"];

#[derive(Debug, Clone, Copy, Default)]
struct EventColumns {
    site: Option<usize>,
    date: Option<usize>,
    frequency: Option<usize>,
    category: Option<usize>,
    completion: Option<usize>,
}

impl EventColumns {
    fn locate(headers: &StringRecord) -> Self {
        let columns = Self {
            site: column_index(headers, &SITE_COLUMNS),
            date: column_index(headers, &[DATE_COLUMN]),
            frequency: column_index(headers, &[FREQUENCY_COLUMN]),
            category: column_index(headers, &[CATEGORY_COLUMN]),
            completion: column_index(headers, &[COMPLETION_COLUMN]),
        };
        for (name, idx) in [
            (SITE_COLUMNS[0], columns.site),
            (DATE_COLUMN, columns.date),
            (FREQUENCY_COLUMN, columns.frequency),
            (CATEGORY_COLUMN, columns.category),
            (COMPLETION_COLUMN, columns.completion),
        ] {
            if idx.is_none() {
                warn!(column = name, "events table is missing a declared column");
            }
        }
        columns
    }
}

/// The events table as read from disk. Every source column is kept so the
/// binarized copy mirrors the input apart from `Completion`.
#[derive(Debug, Clone)]
pub struct EventTable {
    headers: StringRecord,
    records: Vec<StringRecord>,
    columns: EventColumns,
}

impl EventTable {
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let records = rdr.records().collect::<Result<Vec<_>, _>>()?;
        let columns = EventColumns::locate(&headers);
        Ok(Self {
            headers,
            records,
            columns,
        })
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        require_file(path)?;
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let table = Self::from_reader(file).map_err(|e| PipelineError::csv(path, e))?;
        info!(
            path = %path.display(),
            rows = table.len(),
            "events table loaded"
        );
        Ok(table)
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
        wtr.write_record(&self.headers)
            .map_err(|e| PipelineError::csv(path, e))?;
        for record in &self.records {
            wtr.write_record(record)
                .map_err(|e| PipelineError::csv(path, e))?;
        }
        wtr.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    #[cfg(test)]
    fn completion_cells(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        let idx = self.columns.completion;
        self.records
            .iter()
            .map(move |record| idx.and_then(|i| record.get(i)))
    }

    /// Replace every `Completion` cell with its numeric indicator:
    /// `Filled` → 1, `Not Filled` → 0, anything else untouched.
    pub fn binarize(self) -> Self {
        let Some(idx) = self.columns.completion else {
            return self;
        };
        let Self {
            headers,
            records,
            columns,
        } = self;
        let records = records
            .into_iter()
            .map(|record| {
                record
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        if i == idx {
                            Completion::from_raw(cell).indicator().to_string()
                        } else {
                            cell.to_string()
                        }
                    })
                    .collect::<StringRecord>()
            })
            .collect();
        Self {
            headers,
            records,
            columns,
        }
    }

    /// Typed view over a binarized table.
    pub fn events(&self) -> impl Iterator<Item = CompletionEvent> + '_ {
        let cols = self.columns;
        self.records.iter().map(move |record| {
            let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i));
            CompletionEvent {
                site: cell(cols.site).unwrap_or_default().trim().to_string(),
                date: parse_date_safe(cell(cols.date)),
                frequency: cell(cols.frequency).unwrap_or_default().to_string(),
                category: cell(cols.category).unwrap_or_default().trim().to_string(),
                completion: cell(cols.completion)
                    .map(Completion::from_binarized)
                    .unwrap_or_else(|| Completion::Other(String::new())),
            }
        })
    }
}

/// Site → metadata lookup. The first row wins when a site is listed twice.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    sites: Vec<SiteReference>,
    index: HashMap<String, usize>,
}

impl ReferenceTable {
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let locate = |name: &str, candidates: &[&str], required: bool| {
            let idx = column_index(&headers, candidates);
            if idx.is_none() && required {
                warn!(column = name, "reference table is missing a declared column");
            }
            idx
        };
        let site_col = locate("site", REFERENCE_SITE, true);
        let region_col = locate("region", REFERENCE_REGION, true);
        let country_col = locate("country", REFERENCE_COUNTRY, true);
        let activity_col = locate("activity", REFERENCE_ACTIVITY, true);
        let category_col = locate("category", REFERENCE_CATEGORY, false);

        let mut table = Self::default();
        let mut duplicates = 0usize;
        for result in rdr.records() {
            let record = result?;
            let cell = |idx: Option<usize>| clean(idx.and_then(|i| record.get(i)));
            let Some(site) = cell(site_col) else {
                continue;
            };
            if table.index.contains_key(&site) {
                duplicates += 1;
                continue;
            }
            table.index.insert(site.clone(), table.sites.len());
            table.sites.push(SiteReference {
                site,
                region: cell(region_col),
                country: cell(country_col),
                activity: cell(activity_col),
                category: cell(category_col),
            });
        }
        if duplicates > 0 {
            warn!(duplicates, "reference table lists some sites more than once; keeping first");
        }
        Ok(table)
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        require_file(path)?;
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let table = Self::from_reader(file).map_err(|e| PipelineError::csv(path, e))?;
        info!(
            path = %path.display(),
            sites = table.len(),
            "reference table loaded"
        );
        Ok(table)
    }

    pub fn lookup(&self, site: &str) -> Option<&SiteReference> {
        self.index.get(site).map(|&i| &self.sites[i])
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn column_index(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim() == *name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "\
Location,Date,Frequency,KPI Category,Completion,country
Paris,2024-01-31,Month,Environment,Filled,France
Paris,2024-02-29,Month,Environment,Not Filled,France
Dubai,2024-03-31,Quarter,Social,Pending review,UAE
";

    #[test]
    fn binarize_maps_known_literals_and_keeps_others() {
        let table = EventTable::from_reader(EVENTS.as_bytes())
            .expect("events parse")
            .binarize();
        let cells: Vec<_> = table.completion_cells().map(|c| c.unwrap_or_default()).collect();
        assert_eq!(cells, vec!["1", "0", "Pending review"]);
    }

    #[test]
    fn binarize_keeps_every_other_column() {
        let table = EventTable::from_reader(EVENTS.as_bytes())
            .expect("events parse")
            .binarize();
        let mut out = Vec::new();
        {
            let mut wtr = csv::Writer::from_writer(&mut out);
            wtr.write_record(table.headers()).expect("header");
            for record in &table.records {
                wtr.write_record(record).expect("row");
            }
            wtr.flush().expect("flush");
        }
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Location,Date,Frequency,KPI Category,Completion,country\n"));
        assert!(text.contains("Paris,2024-01-31,Month,Environment,1,France"));
        assert!(text.contains("Dubai,2024-03-31,Quarter,Social,Pending review,UAE"));
    }

    #[test]
    fn events_view_types_rows() {
        let table = EventTable::from_reader(EVENTS.as_bytes())
            .expect("events parse")
            .binarize();
        let events: Vec<_> = table.events().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].site, "Paris");
        assert!(events[0].completion.is_submitted());
        assert_eq!(events[1].completion, Completion::NotSubmitted);
        assert_eq!(
            events[2].completion,
            Completion::Other("Pending review".to_string())
        );
        assert_eq!(events[2].date, chrono::NaiveDate::from_ymd_opt(2024, 3, 31));
    }

    #[test]
    fn site_column_accepts_site_header() {
        let csv = "Site,Date,Frequency,KPI Category,Completion\nLyon,2024-01-01,month,Social,1\n";
        let table = EventTable::from_reader(csv.as_bytes()).expect("events parse");
        let event = table.events().next().expect("one event");
        assert_eq!(event.site, "Lyon");
        assert!(event.completion.is_submitted());
    }

    #[test]
    fn missing_events_file_is_reported() {
        let err = EventTable::read(Path::new("no/such/events.csv")).expect_err("missing file");
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }

    #[test]
    fn reference_keeps_first_row_per_site() {
        let csv = "\
Site,Region,country,Activity,Category
Paris,EUROPE,France,IST,Plant
Paris,LATAM,Brazil,IPS,Office
Dubai,MEA,UAE,,Office
";
        let table = ReferenceTable::from_reader(csv.as_bytes()).expect("reference parse");
        assert_eq!(table.len(), 2);
        let paris = table.lookup("Paris").expect("paris present");
        assert_eq!(paris.region.as_deref(), Some("EUROPE"));
        let dubai = table.lookup("Dubai").expect("dubai present");
        assert_eq!(dubai.activity, None);
        assert!(table.lookup("Lyon").is_none());
    }

    #[test]
    fn reference_with_both_site_headers_uses_site() {
        let csv = "Location,Site,Region,country,Activity\nParis,Paris,EUROPE,France,IST\nLyon-01,Lyon,EUROPE,France,IPS\n";
        let table = ReferenceTable::from_reader(csv.as_bytes()).expect("reference parse");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup("Paris").and_then(|r| r.activity.as_deref()),
            Some("IST")
        );
        assert!(table.lookup("Lyon").is_some());
        assert!(table.lookup("Lyon-01").is_none());
    }

    #[test]
    fn reference_with_both_country_headers_uses_lowercase() {
        let csv = "Site,Region,Country,country,Activity\nDubai,MEA,United Arab Emirates,UAE,IPS\n";
        let table = ReferenceTable::from_reader(csv.as_bytes()).expect("reference parse");
        let dubai = table.lookup("Dubai").expect("dubai present");
        assert_eq!(dubai.country.as_deref(), Some("UAE"));
    }

    #[test]
    fn events_without_frequency_or_completion_yield_an_empty_pivot() {
        let csv = "Location,Date,KPI Category\nParis,2024-01-31,Environment\nLyon,2024-02-29,Social\n";
        let table = EventTable::from_reader(csv.as_bytes())
            .expect("events parse")
            .binarize();
        assert_eq!(table.len(), 2);
        assert!(table.completion_cells().all(|c| c.is_none()));
        let events: Vec<_> = table.events().collect();
        assert!(events.iter().all(|e| e.frequency.is_empty()));
        assert!(events.iter().all(|e| !e.completion.is_submitted()));

        let pivot = crate::pivot::PivotMatrix::build(events, Some(2024));
        assert!(pivot.sites().is_empty());
        assert_eq!(pivot.grand_total(), 0);
    }

    #[test]
    fn events_without_completion_count_nothing() {
        let csv = "Location,Date,Frequency,KPI Category\nParis,2024-01-31,Month,Environment\n";
        let table = EventTable::from_reader(csv.as_bytes()).expect("events parse");
        let pivot = crate::pivot::PivotMatrix::build(table.events(), Some(2024));
        assert_eq!(pivot.sites(), ["Paris"]);
        assert_eq!(pivot.count("Paris", "Environment"), Some(0));
        assert_eq!(pivot.grand_total(), 0);
    }

    #[test]
    fn reference_tolerates_missing_optional_columns() {
        let csv = "Location,Region\nParis,EUROPE\n";
        let table = ReferenceTable::from_reader(csv.as_bytes()).expect("reference parse");
        let paris = table.lookup("Paris").expect("paris present");
        assert_eq!(paris.country, None);
        assert_eq!(paris.activity, None);
    }
}
