//! Self-contained HTML fragments for the dashboard.
//!
//! Every fragment is a complete document with inline CSS and SVG so the web
//! layer can embed it verbatim. Rendering is pure: same rows, same bytes.

use crate::types::{
    ActivityBucket, ActivityComparisonRow, CompletionRateRecord, CountryAverageRow, KpiCategory,
    RegionAverageRow,
};
use crate::util::format_percent;
use std::fmt::Write as _;

/// The fixed set of artifacts the front-end loads by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fragment {
    RegionBarChart,
    RegionHeatmap,
    CountryMap,
    ActivityComparison,
    FilterableTable,
}

impl Fragment {
    pub const ALL: [Fragment; 5] = [
        Fragment::RegionBarChart,
        Fragment::RegionHeatmap,
        Fragment::CountryMap,
        Fragment::ActivityComparison,
        Fragment::FilterableTable,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Fragment::RegionBarChart => "average_completion_rates_by_region_without_grand_total.html",
            Fragment::RegionHeatmap => "average_completion_rates_by_region_heatmap.html",
            Fragment::CountryMap => "grand_total_map.html",
            Fragment::ActivityComparison => "comparison_of_IST_IPS_ISI.html",
            Fragment::FilterableTable => "filterable_data_table.html",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.file_name() == name)
    }
}

const KPI_COLORS: [(KpiCategory, &str); 3] = [
    (KpiCategory::Environment, "rgb(67, 0, 153)"),
    (KpiCategory::HealthSafety, "rgb(145, 125, 185)"),
    (KpiCategory::Social, "rgb(180, 180, 180)"),
];

const ACTIVITY_COLORS: [(ActivityBucket, &str); 3] = [
    (ActivityBucket::Ist, "rgb(115, 130, 230)"),
    (ActivityBucket::Ips, "rgb(205, 195, 215)"),
    (ActivityBucket::Isi, "rgb(150, 10, 40)"),
];

const HEATMAP_SCALE: [(f64, [u8; 3]); 3] = [
    (0.0, [225, 220, 230]),
    (0.5, [170, 155, 185]),
    (1.0, [115, 130, 230]),
];

const VIRIDIS_SCALE: [(f64, [u8; 3]); 5] = [
    (0.0, [68, 1, 84]),
    (0.25, [59, 82, 139]),
    (0.5, [33, 145, 140]),
    (0.75, [94, 201, 98]),
    (1.0, [253, 231, 37]),
];

/// One named bar series of a grouped bar chart.
pub struct BarSeries<'a> {
    pub name: &'a str,
    pub color: &'a str,
    pub values: Vec<Option<f64>>,
}

pub fn render_region_bar_chart(rows: &[RegionAverageRow]) -> String {
    let labels: Vec<&str> = rows.iter().map(|r| r.region.as_str()).collect();
    let series: Vec<BarSeries> = KPI_COLORS
        .iter()
        .map(|(category, color)| BarSeries {
            name: category.label(),
            color: *color,
            values: rows
                .iter()
                .map(|r| match category {
                    KpiCategory::Environment => r.environment,
                    KpiCategory::HealthSafety => r.health_safety,
                    KpiCategory::Social => r.social,
                })
                .collect(),
        })
        .collect();
    document(
        "Average Completion Rates by Region (Excluding Grand Total)",
        &grouped_bar_chart(&labels, &series, "Region", "Completion Categories"),
    )
}

pub fn render_activity_comparison(rows: &[ActivityComparisonRow]) -> String {
    let labels: Vec<&str> = rows.iter().map(|r| r.category.label()).collect();
    let series: Vec<BarSeries> = ACTIVITY_COLORS
        .iter()
        .map(|(bucket, color)| BarSeries {
            name: bucket.label(),
            color: *color,
            values: rows.iter().map(|r| r.rate(*bucket)).collect(),
        })
        .collect();
    document(
        "Comparison of IST, IPS, and ISI for Completion Rates by KPI",
        &grouped_bar_chart(&labels, &series, "KPIs", "Activity"),
    )
}

pub fn render_region_heatmap(rows: &[RegionAverageRow]) -> String {
    let values: Vec<f64> = rows
        .iter()
        .flat_map(|r| [r.environment, r.health_safety, r.social, r.grand_total])
        .flatten()
        .collect();
    let (min, max) = bounds(&values);

    let mut body = String::new();
    body.push_str("<table class=\"heatmap\"><thead><tr><th>Completion Categories</th>");
    for row in rows {
        let _ = write!(body, "<th>{}</th>", esc(&row.region));
    }
    body.push_str("</tr></thead><tbody>");
    let lines: [(&str, fn(&RegionAverageRow) -> Option<f64>); 4] = [
        ("Environment", |r| r.environment),
        ("Health &amp; Safety", |r| r.health_safety),
        ("Social", |r| r.social),
        ("Grand Total", |r| r.grand_total),
    ];
    for (label, value_of) in lines {
        let _ = write!(body, "<tr><th>{}</th>", label);
        for row in rows {
            match value_of(row) {
                Some(v) => {
                    let color = scale_color(&HEATMAP_SCALE, normalize(v, min, max));
                    let _ = write!(
                        body,
                        "<td style=\"background:{}\" title=\"{}\">{}</td>",
                        color,
                        esc(&row.region),
                        format_percent(Some(v))
                    );
                }
                None => body.push_str("<td class=\"empty\"></td>"),
            }
        }
        body.push_str("</tr>");
    }
    body.push_str("</tbody></table>");
    document("Average Completion Rates by Region", &body)
}

/// Country tiles coloured by Grand Total on a viridis scale.
pub fn render_country_map(rows: &[CountryAverageRow]) -> String {
    let values: Vec<f64> = rows.iter().filter_map(|r| r.grand_total).collect();
    let (min, max) = bounds(&values);

    let mut body = String::from("<div class=\"tiles\">");
    for row in rows {
        let (color, text) = match row.grand_total {
            Some(v) => (scale_color(&VIRIDIS_SCALE, normalize(v, min, max)), format_percent(Some(v))),
            None => ("rgb(240, 240, 240)".to_string(), "n/a".to_string()),
        };
        let _ = write!(
            body,
            "<div class=\"tile\" style=\"border-left:12px solid {color}\" data-country=\"{name}\">\
<span class=\"name\">{name}</span><span class=\"value\">{text}</span></div>",
            color = color,
            name = esc(&row.country),
            text = text,
        );
    }
    body.push_str("</div>");
    if values.is_empty() {
        body.push_str("<p class=\"empty\">No country data available.</p>");
    } else {
        let _ = write!(
            body,
            "<p class=\"legend\">Completion Rate (%): {} to {}</p>",
            format_percent(Some(min)),
            format_percent(Some(max))
        );
    }
    document("Completion Rates (Grand Total) by Country", &body)
}

/// The rate table with Activity and Region dropdown filters.
pub fn render_filterable_table(records: &[CompletionRateRecord]) -> String {
    const HEADERS: [&str; 10] = [
        "Location",
        "Region",
        "country",
        "Activity",
        "Category",
        "Environment",
        "Health & Safety",
        "Social",
        "Grand Total",
        "Year to Analyze",
    ];
    let region_col = HEADERS.iter().position(|h| *h == "Region").unwrap_or(1);
    let activity_col = HEADERS.iter().position(|h| *h == "Activity").unwrap_or(3);

    let mut body = String::from("<div class=\"filter-container\">");
    let _ = write!(
        body,
        "<label>Activity:</label><select id=\"activity-filter\" data-column=\"{}\">{}</select>",
        activity_col,
        options(records.iter().map(|r| r.activity.as_str()))
    );
    let _ = write!(
        body,
        "<label>Region:</label><select id=\"region-filter\" data-column=\"{}\">{}</select>",
        region_col,
        options(records.iter().map(|r| r.region.as_str()))
    );
    body.push_str("</div><table id=\"rates\" class=\"table table-striped\"><thead><tr>");
    for header in HEADERS {
        let _ = write!(body, "<th>{}</th>", esc(header));
    }
    body.push_str("</tr></thead><tbody>");
    for r in records {
        body.push_str("<tr>");
        for cell in [
            &r.location,
            &r.region,
            &r.country,
            &r.activity,
            &r.category,
            &r.environment,
            &r.health_safety,
            &r.social,
            &r.grand_total,
            &r.year_to_analyze,
        ] {
            let _ = write!(body, "<td>{}</td>", esc(cell));
        }
        body.push_str("</tr>");
    }
    body.push_str("</tbody></table>");
    body.push_str(FILTER_SCRIPT);
    document("Interactive Data Table with Filters", &body)
}

const FILTER_SCRIPT: &str = r#"<script>
(function () {
  var table = document.getElementById('rates');
  var selects = document.querySelectorAll('select[data-column]');
  function apply() {
    Array.prototype.forEach.call(table.tBodies[0].rows, function (row) {
      var visible = true;
      Array.prototype.forEach.call(selects, function (sel) {
        var col = parseInt(sel.getAttribute('data-column'), 10);
        if (sel.value !== '' && row.cells[col].textContent !== sel.value) { visible = false; }
      });
      row.style.display = visible ? '' : 'none';
    });
  }
  Array.prototype.forEach.call(selects, function (sel) { sel.addEventListener('change', apply); });
})();
</script>"#;

fn options<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    let mut out = String::from("<option value=\"\">All</option>");
    for v in seen {
        let _ = write!(out, "<option value=\"{0}\">{0}</option>", esc(v));
    }
    out
}

fn grouped_bar_chart(labels: &[&str], series: &[BarSeries], x_title: &str, legend_title: &str) -> String {
    const WIDTH: f64 = 720.0;
    const HEIGHT: f64 = 360.0;
    const LEFT: f64 = 56.0;
    const BOTTOM: f64 = 48.0;
    const TOP: f64 = 16.0;

    let max_value = series
        .iter()
        .flat_map(|s| s.values.iter().flatten())
        .fold(100.0_f64, |acc, v| acc.max(*v));
    let plot_w = WIDTH - LEFT - 16.0;
    let plot_h = HEIGHT - BOTTOM - TOP;
    let group_w = if labels.is_empty() { plot_w } else { plot_w / labels.len() as f64 };
    let bar_w = group_w * 0.8 / series.len().max(1) as f64;

    let mut svg = String::new();
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {WIDTH} {HEIGHT}\" role=\"img\">"
    );
    for tick in 0..=4 {
        let value = max_value * tick as f64 / 4.0;
        let y = TOP + plot_h - plot_h * value / max_value;
        let _ = write!(
            svg,
            "<line x1=\"{LEFT}\" x2=\"{x2}\" y1=\"{y:.1}\" y2=\"{y:.1}\" class=\"grid\"/>\
<text x=\"{tx}\" y=\"{y:.1}\" class=\"tick\" text-anchor=\"end\">{label}</text>",
            x2 = WIDTH - 16.0,
            tx = LEFT - 6.0,
            label = format_percent(Some(value)),
        );
    }
    for (g, label) in labels.iter().enumerate() {
        let group_x = LEFT + group_w * g as f64 + group_w * 0.1;
        for (s, series) in series.iter().enumerate() {
            let Some(value) = series.values.get(g).copied().flatten() else {
                continue;
            };
            let h = plot_h * value.max(0.0) / max_value;
            let _ = write!(
                svg,
                "<rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" fill=\"{fill}\">\
<title>{name}: {pct}</title></rect>",
                x = group_x + bar_w * s as f64,
                y = TOP + plot_h - h,
                w = bar_w,
                h = h,
                fill = series.color,
                name = esc(series.name),
                pct = format_percent(Some(value)),
            );
        }
        let _ = write!(
            svg,
            "<text x=\"{x:.1}\" y=\"{y:.1}\" class=\"tick\" text-anchor=\"middle\">{label}</text>",
            x = LEFT + group_w * (g as f64 + 0.5),
            y = HEIGHT - BOTTOM + 18.0,
            label = esc(label),
        );
    }
    let _ = write!(
        svg,
        "<text x=\"{x:.1}\" y=\"{y:.1}\" class=\"axis\" text-anchor=\"middle\">{t}</text>\
<text x=\"14\" y=\"{ym:.1}\" class=\"axis\" transform=\"rotate(-90 14 {ym:.1})\" text-anchor=\"middle\">Completion Rate (%)</text></svg>",
        x = LEFT + plot_w / 2.0,
        y = HEIGHT - 8.0,
        t = esc(x_title),
        ym = TOP + plot_h / 2.0,
    );

    let _ = write!(svg, "<div class=\"legend\"><strong>{}</strong>", esc(legend_title));
    for series in series {
        let _ = write!(
            svg,
            "<span><i style=\"background:{}\"></i>{}</span>",
            series.color,
            esc(series.name)
        );
    }
    svg.push_str("</div>");
    svg
}

fn document(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{css}</style>
</head>
<body>
    <h1>{title}</h1>
    {body}
</body>
</html>"#,
        title = esc(title),
        css = INLINE_CSS,
        body = body,
    )
}

const INLINE_CSS: &str = "body{font-family:Arial,sans-serif;margin:16px;color:#222;background:#fff}\
h1{font-size:16px}\
svg{width:100%;max-width:720px;height:auto}\
.grid{stroke:#e5e5e5}.tick{font-size:11px;fill:#555}.axis{font-size:12px;fill:#222}\
.legend span{margin-left:12px}.legend i{display:inline-block;width:10px;height:10px;margin-right:4px}\
table{border-collapse:collapse;font-size:13px}th,td{border:1px solid #ddd;padding:4px 8px;text-align:center}\
td.empty{background:#fafafa}\
.tiles{display:flex;flex-wrap:wrap;gap:8px}\
.tile{padding:6px 10px;background:#f7f7f7;min-width:160px;display:flex;justify-content:space-between}\
.filter-container{margin-bottom:12px}.filter-container select{margin:0 12px 0 4px}";

fn bounds(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

fn normalize(v: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range.abs() < f64::EPSILON {
        1.0
    } else {
        ((v - min) / range).clamp(0.0, 1.0)
    }
}

fn scale_color(stops: &[(f64, [u8; 3])], t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let upper = stops
        .iter()
        .position(|(pos, _)| *pos >= t)
        .unwrap_or(stops.len() - 1)
        .max(1);
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let local = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
    let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * local).round() as u8;
    format!("rgb({}, {}, {})", mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2]))
}

pub fn esc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
