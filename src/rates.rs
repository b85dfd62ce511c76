use crate::config::ConfigError;
use crate::error::{require_file, PipelineError};
use crate::loader::ReferenceTable;
use crate::pivot::PivotMatrix;
use crate::types::{CompletionRateRecord, CompletionRateRow, KpiCategory};
use crate::util::{format_percent, mean_present, parse_f64_safe, parse_i32_safe};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_CURRENT_MONTH: u32 = 12;

/// Declared annual policy maxima per KPI category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyMaxima {
    pub environment: u32,
    pub health_safety: u32,
    pub social: u32,
}

impl Default for PolicyMaxima {
    fn default() -> Self {
        Self {
            environment: 17,
            health_safety: 12,
            social: 5,
        }
    }
}

impl PolicyMaxima {
    /// Every maximum must allow at least one form, otherwise the floored
    /// target would exceed it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in KpiCategory::ALL {
            if self.maximum(category) == 0 {
                return Err(ConfigError::ZeroMaximum(category.label()));
            }
        }
        Ok(())
    }

    pub fn maximum(&self, category: KpiCategory) -> u32 {
        match category {
            KpiCategory::Environment => self.environment,
            KpiCategory::HealthSafety => self.health_safety,
            KpiCategory::Social => self.social,
        }
    }
}

/// Expected number of forms per category by a given month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTargets {
    pub environment: u32,
    pub health_safety: u32,
    pub social: u32,
}

impl CompletionTargets {
    /// Targets are floored at one form so a rate is always defined, which
    /// matters for Social before the first quarter closes.
    pub fn for_month(month: u32, maxima: &PolicyMaxima) -> Self {
        let month = month.clamp(1, 12);
        let quarters_passed = (month - 1) / 3;
        let year_end = u32::from(month == 12);
        let months_elapsed = ((f64::from(month) / 12.0) * 12.0).round_ties_even() as u32;

        let bounded = |value: u32, max: u32| value.min(max).max(1);
        Self {
            environment: bounded(months_elapsed + quarters_passed + year_end, maxima.environment),
            health_safety: bounded(months_elapsed, maxima.health_safety),
            social: bounded(quarters_passed + year_end, maxima.social),
        }
    }

    pub fn target(&self, category: KpiCategory) -> u32 {
        match category {
            KpiCategory::Environment => self.environment,
            KpiCategory::HealthSafety => self.health_safety,
            KpiCategory::Social => self.social,
        }
    }
}

/// Inputs of the rate stage beyond the pivot and reference tables.
#[derive(Debug, Clone, Default)]
pub struct RateOptions {
    pub current_month: Option<u32>,
    pub year_to_analyze: Option<i32>,
    pub maxima: PolicyMaxima,
    /// Exact-match renames applied to pivot site names before the join.
    pub site_aliases: BTreeMap<String, String>,
}

pub fn rate(count: u64, target: u32) -> f64 {
    100.0 * count as f64 / f64::from(target)
}

/// Turn pivot counts into percentages of target and left-join the
/// reference metadata by site. Output is sorted by location.
pub fn compute_rates(
    pivot: &PivotMatrix,
    reference: &ReferenceTable,
    options: &RateOptions,
) -> Vec<CompletionRateRow> {
    let month = options.current_month.unwrap_or(DEFAULT_CURRENT_MONTH);
    let targets = CompletionTargets::for_month(month, &options.maxima);
    info!(
        month,
        environment = targets.environment,
        health_safety = targets.health_safety,
        social = targets.social,
        "expected forms to date"
    );

    let columns: Vec<(KpiCategory, Option<usize>)> = KpiCategory::ALL
        .into_iter()
        .map(|category| (category, pivot.category_index(category.label())))
        .collect();
    for (category, idx) in &columns {
        if idx.is_none() {
            warn!(column = category.label(), "pivot table has no column for category");
        }
    }

    let mut unmatched = 0usize;
    let mut rows: Vec<CompletionRateRow> = pivot
        .sites()
        .iter()
        .enumerate()
        .map(|(i, site)| {
            let counts = pivot.row(i);
            let rate_for = |category: KpiCategory| {
                columns
                    .iter()
                    .find(|(c, _)| *c == category)
                    .and_then(|(_, idx)| *idx)
                    .map(|idx| rate(counts[idx], targets.target(category)))
            };
            let environment = rate_for(KpiCategory::Environment);
            let health_safety = rate_for(KpiCategory::HealthSafety);
            let social = rate_for(KpiCategory::Social);

            let location = options
                .site_aliases
                .get(site)
                .cloned()
                .unwrap_or_else(|| site.clone());
            let meta = reference.lookup(&location);
            if meta.is_none() {
                unmatched += 1;
            }
            CompletionRateRow {
                region: meta.and_then(|m| m.region.clone()),
                country: meta.and_then(|m| m.country.clone()),
                activity: meta.and_then(|m| m.activity.clone()),
                category: meta.and_then(|m| m.category.clone()),
                location,
                environment,
                health_safety,
                social,
                grand_total: mean_present([environment, health_safety, social]),
                year_to_analyze: options.year_to_analyze,
            }
        })
        .collect();

    if unmatched > 0 {
        warn!(unmatched, "sites without reference metadata kept with empty fields");
    }
    rows.sort_by(|a, b| a.location.cmp(&b.location));
    rows
}

impl From<&CompletionRateRow> for CompletionRateRecord {
    fn from(row: &CompletionRateRow) -> Self {
        Self {
            location: row.location.clone(),
            region: row.region.clone().unwrap_or_default(),
            country: row.country.clone().unwrap_or_default(),
            activity: row.activity.clone().unwrap_or_default(),
            category: row.category.clone().unwrap_or_default(),
            environment: format_percent(row.environment),
            health_safety: format_percent(row.health_safety),
            social: format_percent(row.social),
            grand_total: format_percent(row.grand_total),
            year_to_analyze: row
                .year_to_analyze
                .map(|y| y.to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<CompletionRateRecord> for CompletionRateRow {
    fn from(record: CompletionRateRecord) -> Self {
        let optional = |s: String| {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        };
        Self {
            environment: parse_f64_safe(Some(&record.environment)),
            health_safety: parse_f64_safe(Some(&record.health_safety)),
            social: parse_f64_safe(Some(&record.social)),
            grand_total: parse_f64_safe(Some(&record.grand_total)),
            year_to_analyze: parse_i32_safe(Some(&record.year_to_analyze)),
            location: record.location,
            region: optional(record.region),
            country: optional(record.country),
            activity: optional(record.activity),
            category: optional(record.category),
        }
    }
}

pub fn write_rates(path: &Path, rows: &[CompletionRateRow]) -> Result<(), PipelineError> {
    let records: Vec<CompletionRateRecord> = rows.iter().map(CompletionRateRecord::from).collect();
    crate::output::write_csv(path, &records)?;
    info!(path = %path.display(), rows = rows.len(), "completion rates saved");
    Ok(())
}

/// Re-read a rate table; percentages come back as whole numbers.
pub fn read_rates(path: &Path) -> Result<Vec<CompletionRateRow>, PipelineError> {
    require_file(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;
    rdr.deserialize::<CompletionRateRecord>()
        .map(|result| {
            result
                .map(CompletionRateRow::from)
                .map_err(|e| PipelineError::csv(path, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Completion, CompletionEvent};
    use chrono::NaiveDate;

    fn submitted(site: &str, category: &str, n: usize) -> Vec<CompletionEvent> {
        (0..n)
            .map(|_| CompletionEvent {
                site: site.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 6, 30),
                frequency: "Month".to_string(),
                category: category.to_string(),
                completion: Completion::Submitted,
            })
            .collect()
    }

    fn reference() -> ReferenceTable {
        let csv = "Site,Region,country,Activity\nParis,EUROPE,France,IST\nDubai,MEA,UAE,IPS\n";
        ReferenceTable::from_reader(csv.as_bytes()).expect("reference parses")
    }

    #[test]
    fn november_targets_follow_policy() {
        let targets = CompletionTargets::for_month(11, &PolicyMaxima::default());
        assert_eq!(
            targets,
            CompletionTargets {
                environment: 14,
                health_safety: 11,
                social: 3
            }
        );
    }

    #[test]
    fn december_targets_hit_the_annual_maxima() {
        let targets = CompletionTargets::for_month(12, &PolicyMaxima::default());
        assert_eq!(targets.environment, 16);
        assert_eq!(targets.health_safety, 12);
        assert_eq!(targets.social, 4);
    }

    #[test]
    fn targets_stay_within_bounds_for_every_month() {
        let maxima = PolicyMaxima::default();
        for month in 1..=12 {
            let targets = CompletionTargets::for_month(month, &maxima);
            for (category, max) in [
                (KpiCategory::Environment, maxima.environment),
                (KpiCategory::HealthSafety, maxima.health_safety),
                (KpiCategory::Social, maxima.social),
            ] {
                let target = targets.target(category);
                assert!(target >= 1, "month {month} {category} target {target}");
                assert!(target <= max, "month {month} {category} target {target}");
            }
        }
    }

    #[test]
    fn overridden_maxima_cap_targets() {
        let maxima = PolicyMaxima {
            environment: 10,
            health_safety: 6,
            social: 2,
        };
        let targets = CompletionTargets::for_month(11, &maxima);
        assert_eq!(targets.environment, 10);
        assert_eq!(targets.health_safety, 6);
        assert_eq!(targets.social, 2);
    }

    #[test]
    fn zero_maximum_is_rejected() {
        let maxima = PolicyMaxima {
            social: 0,
            ..PolicyMaxima::default()
        };
        let err = maxima.validate().expect_err("zero social maximum");
        assert!(matches!(err, ConfigError::ZeroMaximum("Social")));
        assert!(PolicyMaxima::default().validate().is_ok());
    }

    #[test]
    fn seven_environment_forms_in_november_is_half() {
        let mut events = submitted("Paris", "Environment", 7);
        events.extend(submitted("Paris", "Health & Safety", 11));
        events.extend(submitted("Paris", "Social", 3));
        let pivot = PivotMatrix::build(events, Some(2024));
        let options = RateOptions {
            current_month: Some(11),
            ..RateOptions::default()
        };
        let rows = compute_rates(&pivot, &reference(), &options);
        assert_eq!(rows.len(), 1);
        let paris = &rows[0];
        assert_eq!(paris.environment, Some(50.0));
        assert_eq!(paris.health_safety, Some(100.0));
        assert_eq!(paris.social, Some(100.0));
        let grand = paris.grand_total.expect("grand total");
        assert!((grand - 250.0 / 3.0).abs() < 1e-9);
        assert_eq!(CompletionRateRecord::from(paris).grand_total, "83%");
        assert_eq!(paris.region.as_deref(), Some("EUROPE"));
    }

    #[test]
    fn missing_month_defaults_to_december() {
        let pivot = PivotMatrix::build(submitted("Paris", "Health & Safety", 6), None);
        let rows = compute_rates(&pivot, &reference(), &RateOptions::default());
        assert_eq!(rows[0].health_safety, Some(50.0));
    }

    #[test]
    fn grand_total_skips_absent_categories() {
        let pivot = PivotMatrix::build(submitted("Paris", "Environment", 14), Some(2024));
        let options = RateOptions {
            current_month: Some(11),
            ..RateOptions::default()
        };
        let rows = compute_rates(&pivot, &reference(), &options);
        assert_eq!(rows[0].environment, Some(100.0));
        assert_eq!(rows[0].social, None);
        assert_eq!(rows[0].grand_total, Some(100.0));
    }

    #[test]
    fn unmatched_sites_are_kept_with_empty_metadata() {
        let mut events = submitted("Zurich", "Environment", 1);
        events.extend(submitted("Paris", "Environment", 1));
        let pivot = PivotMatrix::build(events, None);
        let rows = compute_rates(&pivot, &reference(), &RateOptions::default());
        let locations: Vec<_> = rows.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(locations, vec!["Paris", "Zurich"]);
        let zurich = &rows[1];
        assert_eq!(zurich.region, None);
        assert_eq!(zurich.country, None);
        assert_eq!(zurich.activity, None);
    }

    #[test]
    fn site_aliases_apply_before_the_join() {
        let pivot = PivotMatrix::build(submitted("Dubai Plant", "Social", 1), None);
        let options = RateOptions {
            year_to_analyze: Some(2024),
            site_aliases: BTreeMap::from([("Dubai Plant".to_string(), "Dubai".to_string())]),
            ..RateOptions::default()
        };
        let rows = compute_rates(&pivot, &reference(), &options);
        assert_eq!(rows[0].location, "Dubai");
        assert_eq!(rows[0].region.as_deref(), Some("MEA"));
        assert_eq!(rows[0].year_to_analyze, Some(2024));
    }

    #[test]
    fn malformed_counts_can_exceed_one_hundred_percent() {
        assert_eq!(rate(6, 3), 200.0);
    }

    #[test]
    fn rate_file_round_trip_keeps_whole_percentages() {
        let pivot = PivotMatrix::build(submitted("Paris", "Environment", 7), None);
        let options = RateOptions {
            current_month: Some(11),
            year_to_analyze: Some(2024),
            ..RateOptions::default()
        };
        let rows = compute_rates(&pivot, &reference(), &options);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("completion_rates_with_activity_region.csv");
        write_rates(&path, &rows).expect("rates written");
        let reread = read_rates(&path).expect("rates read");
        assert_eq!(reread.len(), 1);
        assert_eq!(reread[0].environment, Some(50.0));
        assert_eq!(reread[0].social, None);
        assert_eq!(reread[0].activity.as_deref(), Some("IST"));
        assert_eq!(reread[0].year_to_analyze, Some(2024));
    }
}
