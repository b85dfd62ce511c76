use crate::config::{DashboardParameters, PresentationConfig};
use crate::error::PipelineError;
use crate::loader::{EventTable, ReferenceTable};
use crate::output::{create_dir, write_csv, write_html, write_json};
use crate::pivot::PivotMatrix;
use crate::rates::{compute_rates, write_rates, PolicyMaxima, RateOptions};
use crate::render::{self, Fragment};
use crate::reports;
use crate::types::{CompletionRateRecord, CompletionRateRow, SummaryStats};
use crate::util::format_int;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const EVENTS_FILE: &str = "Filled_not filled.csv";
pub const REFERENCE_FILE: &str = "Activity_Region_Category.csv";
pub const BINARIZED_FILE: &str = "filled_0_1.csv";
pub const PIVOT_FILE: &str = "Completed_Forms_Pivot.csv";
pub const RATES_FILE: &str = "completion_rates_with_activity_region.csv";
pub const RATES_WITH_COUNTRY_FILE: &str = "completion_rates_with_activity_region_with_country.csv";
pub const COUNTRY_AVERAGES_FILE: &str = "average_completion_rates_per_country.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const ASSETS_DIR: &str = "Assets";
pub const DONE_MARKER: &str = ".preprocess_done";

/// Hand-off between stages. File staging writes each intermediate table
/// and continues from the re-read copy; in-memory staging passes it on.
pub trait Staging {
    fn stage_events(&mut self, table: EventTable) -> Result<EventTable, PipelineError>;
    fn stage_pivot(&mut self, pivot: PivotMatrix) -> Result<PivotMatrix, PipelineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStaging;

impl Staging for InMemoryStaging {
    fn stage_events(&mut self, table: EventTable) -> Result<EventTable, PipelineError> {
        Ok(table)
    }

    fn stage_pivot(&mut self, pivot: PivotMatrix) -> Result<PivotMatrix, PipelineError> {
        Ok(pivot)
    }
}

#[derive(Debug, Clone)]
pub struct FileStaging {
    output_dir: PathBuf,
}

impl FileStaging {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl Staging for FileStaging {
    fn stage_events(&mut self, table: EventTable) -> Result<EventTable, PipelineError> {
        let path = self.output_dir.join(BINARIZED_FILE);
        table.write(&path)?;
        info!(path = %path.display(), "processed completion data saved");
        EventTable::read(&path)
    }

    fn stage_pivot(&mut self, pivot: PivotMatrix) -> Result<PivotMatrix, PipelineError> {
        let path = self.output_dir.join(PIVOT_FILE);
        pivot.write(&path)?;
        PivotMatrix::read(&path)
    }
}

/// Everything one run needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub events_path: PathBuf,
    pub reference_path: PathBuf,
    pub output_dir: PathBuf,
    pub parameters: DashboardParameters,
    pub maxima: PolicyMaxima,
    pub site_aliases: BTreeMap<String, String>,
    pub presentation: PresentationConfig,
}

impl PipelineConfig {
    pub fn new(input_dir: &Path, output_dir: &Path, parameters: DashboardParameters) -> Self {
        Self {
            events_path: input_dir.join(EVENTS_FILE),
            reference_path: input_dir.join(REFERENCE_FILE),
            output_dir: output_dir.to_path_buf(),
            parameters,
            maxima: PolicyMaxima::default(),
            site_aliases: BTreeMap::new(),
            presentation: PresentationConfig::default(),
        }
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.output_dir.join(ASSETS_DIR)
    }

    pub fn rates_path(&self) -> PathBuf {
        self.output_dir.join(RATES_FILE)
    }

    fn rate_options(&self) -> RateOptions {
        RateOptions {
            current_month: Some(self.parameters.current_month),
            year_to_analyze: Some(self.parameters.year_to_analyze),
            maxima: self.maxima,
            site_aliases: self.site_aliases.clone(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub events: EventTable,
    pub pivot: PivotMatrix,
    pub reference: ReferenceTable,
    pub rates: Vec<CompletionRateRow>,
}

impl PipelineOutput {
    pub fn submitted_events(&self) -> usize {
        self.events
            .events()
            .filter(|e| e.completion.is_submitted())
            .count()
    }
}

/// Ingest, binarize, pivot and rate. Writes the final rate table; the
/// intermediate tables are written only if `staging` does so.
pub fn run_pipeline<S: Staging>(
    config: &PipelineConfig,
    staging: &mut S,
) -> Result<PipelineOutput, PipelineError> {
    config.maxima.validate()?;
    create_dir(&config.output_dir)?;

    let events = EventTable::read(&config.events_path)?.binarize();
    let events = staging.stage_events(events)?;

    let pivot = PivotMatrix::build(events.events(), Some(config.parameters.year_to_analyze));
    let pivot = staging.stage_pivot(pivot)?;

    let reference = ReferenceTable::read(&config.reference_path)?;
    let rates = compute_rates(&pivot, &reference, &config.rate_options());
    write_rates(&config.rates_path(), &rates)?;

    Ok(PipelineOutput {
        events,
        pivot,
        reference,
        rates,
    })
}

/// Aggregate the rate table and write every named fragment plus the
/// supporting country tables.
pub fn render_presentation(
    config: &PipelineConfig,
    rates: &[CompletionRateRow],
    reference: &ReferenceTable,
) -> Result<(), PipelineError> {
    let assets = config.assets_dir();
    create_dir(&assets)?;
    let presentation = &config.presentation;

    let by_region = reports::region_averages(rates, &presentation.region_order);
    let with_country = reports::with_countries(rates, reference, &presentation.country_aliases);
    let by_country = reports::country_averages(&with_country);
    let by_activity = reports::activity_comparison(rates);

    let country_records: Vec<CompletionRateRecord> =
        with_country.iter().map(CompletionRateRecord::from).collect();
    write_csv(&config.output_dir.join(RATES_WITH_COUNTRY_FILE), &country_records)?;
    write_csv(&config.output_dir.join(COUNTRY_AVERAGES_FILE), &by_country)?;

    for fragment in Fragment::ALL {
        let html = match fragment {
            Fragment::RegionBarChart => render::render_region_bar_chart(&by_region),
            Fragment::RegionHeatmap => render::render_region_heatmap(&by_region),
            Fragment::CountryMap => render::render_country_map(&by_country),
            Fragment::ActivityComparison => render::render_activity_comparison(&by_activity),
            Fragment::FilterableTable => render::render_filterable_table(&country_records),
        };
        write_html(&assets.join(fragment.file_name()), &html)?;
    }
    Ok(())
}

/// A full refresh: clear the done marker, run the pipeline, render the
/// fragments, write the summary, then mark the input directory done.
pub fn run_all<S: Staging>(
    config: &PipelineConfig,
    staging: &mut S,
) -> Result<(PipelineOutput, SummaryStats), PipelineError> {
    let marker = config
        .events_path
        .parent()
        .map(|dir| dir.join(DONE_MARKER));
    if let Some(marker) = marker.as_deref().filter(|m| m.exists()) {
        std::fs::remove_file(marker).map_err(|e| PipelineError::io(marker, e))?;
        info!("previous done marker removed");
    }

    let output = run_pipeline(config, staging)?;
    render_presentation(config, &output.rates, &output.reference)?;

    let summary = reports::summarize(
        &output.rates,
        output.events.len(),
        output.submitted_events(),
        config.parameters.year_to_analyze,
        config.parameters.current_month,
    );
    write_json(&config.output_dir.join(SUMMARY_FILE), &summary)?;

    if let Some(marker) = marker.as_deref() {
        std::fs::write(marker, "Preprocessing complete.")
            .map_err(|e| PipelineError::io(marker, e))?;
    }
    info!(
        events = %format_int(summary.total_events),
        sites = %format_int(summary.total_sites),
        "all data generated successfully"
    );
    Ok((output, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_staging_passes_tables_through() {
        let csv = "Location,Date,Frequency,KPI Category,Completion\nParis,2024-01-31,Month,Social,Filled\n";
        let table = EventTable::from_reader(csv.as_bytes()).expect("events parse").binarize();
        let staged = InMemoryStaging.stage_events(table).expect("staged");
        assert_eq!(staged.len(), 1);
        let pivot = PivotMatrix::build(staged.events(), Some(2024));
        let staged_pivot = InMemoryStaging.stage_pivot(pivot.clone()).expect("staged");
        assert_eq!(staged_pivot, pivot);
    }

    #[test]
    fn file_staging_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut staging = FileStaging::new(dir.path());
        let csv = "Location,Date,Frequency,KPI Category,Completion\nParis,2024-01-31,Month,Social,Filled\nParis,2024-02-29,Month,Social,Not Filled\n";
        let table = EventTable::from_reader(csv.as_bytes()).expect("events parse").binarize();
        let staged = staging.stage_events(table).expect("staged");
        assert!(dir.path().join(BINARIZED_FILE).exists());
        let pivot = PivotMatrix::build(staged.events(), Some(2024));
        let staged_pivot = staging.stage_pivot(pivot.clone()).expect("staged");
        assert!(dir.path().join(PIVOT_FILE).exists());
        assert_eq!(staged_pivot, pivot);
        assert_eq!(staged_pivot.count("Paris", "Social"), Some(1));
    }

    #[test]
    fn missing_reference_aborts_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("Input");
        std::fs::create_dir_all(&input).expect("input dir");
        std::fs::write(
            input.join(EVENTS_FILE),
            "Location,Date,Frequency,KPI Category,Completion\nParis,2024-01-31,Month,Social,Filled\n",
        )
        .expect("events written");
        let config = PipelineConfig::new(&input, &dir.path().join("Output"), DashboardParameters::default());
        let err = run_pipeline(&config, &mut InMemoryStaging).expect_err("reference missing");
        match err {
            PipelineError::MissingFile(path) => assert!(path.ends_with(REFERENCE_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_maximum_stops_the_run_before_any_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("Output");
        let mut config = PipelineConfig::new(dir.path(), &output, DashboardParameters::default());
        config.maxima.health_safety = 0;
        let err = run_pipeline(&config, &mut InMemoryStaging).expect_err("invalid maxima");
        assert!(matches!(
            err,
            PipelineError::Config(crate::config::ConfigError::ZeroMaximum("Health & Safety"))
        ));
        assert!(!output.exists());
    }
}
