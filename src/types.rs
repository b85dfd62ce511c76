use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tabled::Tabled;

/// The three tracked compliance dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KpiCategory {
    Environment,
    HealthSafety,
    Social,
}

impl KpiCategory {
    pub const ALL: [KpiCategory; 3] = [
        KpiCategory::Environment,
        KpiCategory::HealthSafety,
        KpiCategory::Social,
    ];

    pub fn label(self) -> &'static str {
        match self {
            KpiCategory::Environment => "Environment",
            KpiCategory::HealthSafety => "Health & Safety",
            KpiCategory::Social => "Social",
        }
    }
}

impl fmt::Display for KpiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Completion status of one form after binarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Submitted,
    NotSubmitted,
    /// Any literal that is neither; kept verbatim.
    Other(String),
}

impl Completion {
    pub const SUBMITTED_LITERAL: &'static str = "Filled";
    pub const NOT_SUBMITTED_LITERAL: &'static str = "Not Filled";

    /// Classify a raw status as found in the source export.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            Self::SUBMITTED_LITERAL => Completion::Submitted,
            Self::NOT_SUBMITTED_LITERAL => Completion::NotSubmitted,
            other => Completion::Other(other.to_string()),
        }
    }

    /// Classify an already-binarized cell (`1`, `0`, or a passthrough literal).
    pub fn from_binarized(cell: &str) -> Self {
        match cell.trim() {
            "1" | "1.0" => Completion::Submitted,
            "0" | "0.0" => Completion::NotSubmitted,
            _ => Completion::Other(cell.to_string()),
        }
    }

    /// The value written into the binarized table.
    pub fn indicator(&self) -> &str {
        match self {
            Completion::Submitted => "1",
            Completion::NotSubmitted => "0",
            Completion::Other(raw) => raw,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Completion::Submitted)
    }
}

/// One typed row of the events table.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub site: String,
    pub date: Option<NaiveDate>,
    pub frequency: String,
    pub category: String,
    pub completion: Completion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteReference {
    pub site: String,
    pub region: Option<String>,
    pub country: Option<String>,
    pub activity: Option<String>,
    pub category: Option<String>,
}

/// Reporting bucket of a site's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityBucket {
    Ist,
    Ips,
    /// Everything that is not IST or IPS, including a missing activity.
    Isi,
}

impl ActivityBucket {
    pub const ALL: [ActivityBucket; 3] = [
        ActivityBucket::Ist,
        ActivityBucket::Ips,
        ActivityBucket::Isi,
    ];

    pub fn classify(activity: Option<&str>) -> Self {
        match activity.map(str::trim) {
            Some("IST") => ActivityBucket::Ist,
            Some("IPS") => ActivityBucket::Ips,
            _ => ActivityBucket::Isi,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActivityBucket::Ist => "IST",
            ActivityBucket::Ips => "IPS",
            ActivityBucket::Isi => "ISI",
        }
    }
}

/// Per-site completion rates with reference metadata. Rates are numeric
/// percentages; `None` means the category was not present in the pivot.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRateRow {
    pub location: String,
    pub region: Option<String>,
    pub country: Option<String>,
    pub activity: Option<String>,
    pub category: Option<String>,
    pub environment: Option<f64>,
    pub health_safety: Option<f64>,
    pub social: Option<f64>,
    pub grand_total: Option<f64>,
    pub year_to_analyze: Option<i32>,
}

impl CompletionRateRow {
    pub fn rate(&self, category: KpiCategory) -> Option<f64> {
        match category {
            KpiCategory::Environment => self.environment,
            KpiCategory::HealthSafety => self.health_safety,
            KpiCategory::Social => self.social,
        }
    }
}

/// Display form of `CompletionRateRow`, as written to
/// `completion_rates_with_activity_region.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
pub struct CompletionRateRecord {
    #[serde(rename = "Location")]
    #[tabled(rename = "Location")]
    pub location: String,
    #[serde(rename = "Region")]
    #[tabled(rename = "Region")]
    pub region: String,
    #[serde(rename = "country")]
    #[tabled(rename = "country")]
    pub country: String,
    #[serde(rename = "Activity")]
    #[tabled(rename = "Activity")]
    pub activity: String,
    #[serde(rename = "Category")]
    #[tabled(rename = "Category")]
    pub category: String,
    #[serde(rename = "Environment")]
    #[tabled(rename = "Environment")]
    pub environment: String,
    #[serde(rename = "Health & Safety")]
    #[tabled(rename = "Health & Safety")]
    pub health_safety: String,
    #[serde(rename = "Social")]
    #[tabled(rename = "Social")]
    pub social: String,
    #[serde(rename = "Grand Total")]
    #[tabled(rename = "Grand Total")]
    pub grand_total: String,
    #[serde(rename = "Year to Analyze")]
    #[tabled(rename = "Year to Analyze")]
    pub year_to_analyze: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct RegionAverageRow {
    #[serde(rename = "Region")]
    #[tabled(rename = "Region")]
    pub region: String,
    #[serde(rename = "Environment", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Environment", display_with = "crate::util::display_opt_rate")]
    pub environment: Option<f64>,
    #[serde(rename = "Health & Safety", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Health & Safety", display_with = "crate::util::display_opt_rate")]
    pub health_safety: Option<f64>,
    #[serde(rename = "Social", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Social", display_with = "crate::util::display_opt_rate")]
    pub social: Option<f64>,
    #[serde(rename = "Grand Total", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Grand Total", display_with = "crate::util::display_opt_rate")]
    pub grand_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct CountryAverageRow {
    #[serde(rename = "country")]
    #[tabled(rename = "country")]
    pub country: String,
    #[serde(rename = "Environment", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Environment", display_with = "crate::util::display_opt_rate")]
    pub environment: Option<f64>,
    #[serde(rename = "Health & Safety", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Health & Safety", display_with = "crate::util::display_opt_rate")]
    pub health_safety: Option<f64>,
    #[serde(rename = "Social", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Social", display_with = "crate::util::display_opt_rate")]
    pub social: Option<f64>,
    #[serde(rename = "Grand Total", serialize_with = "crate::util::serialize_opt_rate")]
    #[tabled(rename = "Grand Total", display_with = "crate::util::display_opt_rate")]
    pub grand_total: Option<f64>,
}

/// Mean rate of each activity bucket for one KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityComparisonRow {
    pub category: KpiCategory,
    pub ist: Option<f64>,
    pub ips: Option<f64>,
    pub isi: Option<f64>,
}

impl ActivityComparisonRow {
    pub fn rate(&self, bucket: ActivityBucket) -> Option<f64> {
        match bucket {
            ActivityBucket::Ist => self.ist,
            ActivityBucket::Ips => self.ips,
            ActivityBucket::Isi => self.isi,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub year_to_analyze: i32,
    pub current_month: u32,
    pub total_events: usize,
    pub submitted_events: usize,
    pub total_sites: usize,
    pub unmatched_sites: usize,
    pub avg_grand_total: Option<f64>,
}
