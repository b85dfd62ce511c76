use crate::loader::ReferenceTable;
use crate::types::{
    ActivityBucket, ActivityComparisonRow, CompletionRateRow, CountryAverageRow, KpiCategory,
    RegionAverageRow, SummaryStats,
};
use crate::util::mean_present;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Mean category rates per region. Regions in `order` come first, in that
/// order; the rest follow alphabetically. Rows without a region are skipped.
pub fn region_averages(rows: &[CompletionRateRow], order: &[String]) -> Vec<RegionAverageRow> {
    let mut by_region: HashMap<&str, Vec<&CompletionRateRow>> = HashMap::new();
    for row in rows {
        if let Some(region) = row.region.as_deref() {
            by_region.entry(region).or_default().push(row);
        }
    }

    let mut regions: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|r| by_region.contains_key(r))
        .collect();
    let mut rest: Vec<&str> = by_region
        .keys()
        .copied()
        .filter(|r| !order.iter().any(|o| o == r))
        .collect();
    rest.sort_unstable();
    regions.extend(rest);

    regions
        .into_iter()
        .map(|region| {
            let group = &by_region[region];
            RegionAverageRow {
                region: region.to_string(),
                environment: mean_present(group.iter().map(|r| r.environment)),
                health_safety: mean_present(group.iter().map(|r| r.health_safety)),
                social: mean_present(group.iter().map(|r| r.social)),
                grand_total: mean_present(group.iter().map(|r| r.grand_total)),
            }
        })
        .collect()
}

/// Attach the country of each site from the reference table, normalizing
/// country names through `aliases`. Duplicate locations keep the first row.
pub fn with_countries(
    rows: &[CompletionRateRow],
    reference: &ReferenceTable,
    aliases: &BTreeMap<String, String>,
) -> Vec<CompletionRateRow> {
    let mut seen: HashSet<&str> = HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(row.location.as_str()))
        .map(|row| {
            let country = reference
                .lookup(&row.location)
                .and_then(|site| site.country.clone())
                .or_else(|| row.country.clone())
                .map(|c| aliases.get(&c).cloned().unwrap_or(c));
            CompletionRateRow {
                country,
                ..row.clone()
            }
        })
        .collect()
}

/// Mean rates per country, sorted by country name.
pub fn country_averages(rows: &[CompletionRateRow]) -> Vec<CountryAverageRow> {
    let mut by_country: BTreeMap<&str, Vec<&CompletionRateRow>> = BTreeMap::new();
    for row in rows {
        if let Some(country) = row.country.as_deref() {
            by_country.entry(country).or_default().push(row);
        }
    }
    by_country
        .into_iter()
        .map(|(country, group)| CountryAverageRow {
            country: country.to_string(),
            environment: mean_present(group.iter().map(|r| r.environment)),
            health_safety: mean_present(group.iter().map(|r| r.health_safety)),
            social: mean_present(group.iter().map(|r| r.social)),
            grand_total: mean_present(group.iter().map(|r| r.grand_total)),
        })
        .collect()
}

/// IST vs IPS vs ISI mean rate for each KPI.
pub fn activity_comparison(rows: &[CompletionRateRow]) -> Vec<ActivityComparisonRow> {
    let bucket_mean = |bucket: ActivityBucket, category: KpiCategory| {
        mean_present(
            rows.iter()
                .filter(|r| ActivityBucket::classify(r.activity.as_deref()) == bucket)
                .map(|r| r.rate(category)),
        )
    };
    KpiCategory::ALL
        .into_iter()
        .map(|category| ActivityComparisonRow {
            category,
            ist: bucket_mean(ActivityBucket::Ist, category),
            ips: bucket_mean(ActivityBucket::Ips, category),
            isi: bucket_mean(ActivityBucket::Isi, category),
        })
        .collect()
}

pub fn summarize(
    rows: &[CompletionRateRow],
    total_events: usize,
    submitted_events: usize,
    year_to_analyze: i32,
    current_month: u32,
) -> SummaryStats {
    SummaryStats {
        year_to_analyze,
        current_month,
        total_events,
        submitted_events,
        total_sites: rows.len(),
        unmatched_sites: rows
            .iter()
            .filter(|r| r.region.is_none() && r.country.is_none() && r.activity.is_none())
            .count(),
        avg_grand_total: mean_present(rows.iter().map(|r| r.grand_total)),
    }
}
