use crate::config::ServerConfig;
use crate::error::AppError;
use crate::rates::read_rates;
use crate::render::{esc, Fragment};
use crate::reports;
use crate::types::{ActivityBucket, CompletionRateRow};
use crate::util::format_percent;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const BASE_PATH: &str = "/kpi-dashboard";

/// Read-only view over the pipeline's output directory.
#[derive(Debug, Clone)]
pub struct WebState {
    pub assets_dir: PathBuf,
    pub rates_path: PathBuf,
    pub region_order: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Overview,
    Activity,
    Regions,
    Countries,
}

impl Page {
    const ALL: [Page; 4] = [Page::Overview, Page::Activity, Page::Regions, Page::Countries];

    fn path(self) -> &'static str {
        match self {
            Page::Overview => "/kpi-dashboard/overview",
            Page::Activity => "/kpi-dashboard/activity",
            Page::Regions => "/kpi-dashboard/regions",
            Page::Countries => "/kpi-dashboard/countries",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Page::Overview => "Overview",
            Page::Activity => "Activity Comparison",
            Page::Regions => "Regions",
            Page::Countries => "Countries",
        }
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(overview_page))
        .route(Page::Overview.path(), get(overview_page))
        .route(Page::Activity.path(), get(activity_page))
        .route(Page::Regions.path(), get(regions_page))
        .route(Page::Countries.path(), get(countries_page))
        .route("/kpi-dashboard/full-view", get(full_view_page))
        .route("/assets/:name", get(fragment_asset))
        .route("/health", get(healthcheck))
        .with_state(Arc::new(state))
}

pub async fn serve(server: &ServerConfig, state: WebState) -> Result<(), AppError> {
    let addr = server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dashboard available at http://{addr}{BASE_PATH}/overview");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn fragment_asset(
    State(state): State<Arc<WebState>>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    let Some(fragment) = Fragment::from_file_name(&name) else {
        return (StatusCode::NOT_FOUND, "unknown asset").into_response();
    };
    match tokio::fs::read(state.assets_dir.join(fragment.file_name())).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            decode(bytes),
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "asset not generated").into_response(),
    }
}

async fn overview_page(State(state): State<Arc<WebState>>) -> Html<String> {
    Html(layout(Page::Overview.title(), &overview_body(&state).await))
}

async fn activity_page(State(state): State<Arc<WebState>>) -> Html<String> {
    Html(layout(Page::Activity.title(), &activity_body(&state).await))
}

async fn regions_page(State(state): State<Arc<WebState>>) -> Html<String> {
    Html(layout(Page::Regions.title(), &regions_body(&state).await))
}

async fn countries_page(State(state): State<Arc<WebState>>) -> Html<String> {
    Html(layout(Page::Countries.title(), &countries_body(&state).await))
}

async fn full_view_page(State(state): State<Arc<WebState>>) -> Html<String> {
    let mut body = String::new();
    body.push_str(&overview_body(&state).await);
    body.push_str(&activity_body(&state).await);
    body.push_str(&regions_body(&state).await);
    body.push_str(&countries_body(&state).await);
    Html(layout("Full View", &body))
}

async fn overview_body(state: &WebState) -> String {
    section(
        "Completion Rates by Site",
        &embed(state, Fragment::FilterableTable, "calc(100vh - 120px)").await,
    )
}

async fn activity_body(state: &WebState) -> String {
    let mut body = section(
        "Comparison of IST, IPS, and ISI",
        &embed(state, Fragment::ActivityComparison, "500px").await,
    );
    let table = match load_rates(state) {
        Ok(rows) => activity_table(&rows),
        Err(message) => message,
    };
    body.push_str(&section("KPI Completion Rates by Activity", &table));
    body
}

async fn regions_body(state: &WebState) -> String {
    let mut body = section(
        "Average Completion Rates by Region (Heatmap)",
        &embed(state, Fragment::RegionHeatmap, "500px").await,
    );
    body.push_str(&section(
        "Average Completion Rates by Region (Bar Chart)",
        &embed(state, Fragment::RegionBarChart, "500px").await,
    ));
    body
}

async fn countries_body(state: &WebState) -> String {
    let mut body = section(
        "Global Completion Map",
        &embed(state, Fragment::CountryMap, "520px").await,
    );
    let table = match load_rates(state) {
        Ok(rows) => region_table(&rows, &state.region_order),
        Err(message) => message,
    };
    body.push_str(&section("Region Completion Rates", &table));
    body
}

/// Inline a fragment in an iframe, or a diagnostic if it cannot be read.
async fn embed(state: &WebState, fragment: Fragment, height: &str) -> String {
    let path = state.assets_dir.join(fragment.file_name());
    match tokio::fs::read(&path).await {
        Ok(bytes) => format!(
            "<iframe srcdoc=\"{}\" style=\"width:100%;height:{};border:none\"></iframe>",
            esc(&decode(bytes)),
            height
        ),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "fragment unavailable");
            diagnostic(&format!(
                "Error: File {} not found in {}.",
                fragment.file_name(),
                state.assets_dir.display()
            ))
        }
    }
}

fn load_rates(state: &WebState) -> Result<Vec<CompletionRateRow>, String> {
    read_rates(&state.rates_path).map_err(|err| {
        warn!(error = %err, "rate table unavailable");
        diagnostic(&format!("Error: Input file missing -> {}", state.rates_path.display()))
    })
}

/// UTF-8 when valid, otherwise Latin-1.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}

fn activity_table(rows: &[CompletionRateRow]) -> String {
    let comparison = reports::activity_comparison(rows);
    let mut html = String::from("<table class=\"kpi\"><thead><tr><th>KPI</th>");
    for bucket in ActivityBucket::ALL {
        let _ = write!(html, "<th>{} Completion Rate (%)</th>", bucket.label());
    }
    html.push_str("</tr></thead><tbody>");
    for row in &comparison {
        let _ = write!(html, "<tr><td>{}</td>", esc(row.category.label()));
        for bucket in ActivityBucket::ALL {
            let _ = write!(html, "<td>{}</td>", format_percent(row.rate(bucket)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    html
}

fn region_table(rows: &[CompletionRateRow], order: &[String]) -> String {
    let averages = reports::region_averages(rows, order);
    let mut html = String::from(
        "<table class=\"kpi\"><thead><tr><th>Region</th><th>Environment</th>\
<th>Health &amp; Safety</th><th>Social</th><th>Total</th></tr></thead><tbody>",
    );
    for row in &averages {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            esc(&row.region),
            format_percent(row.environment),
            format_percent(row.health_safety),
            format_percent(row.social),
            format_percent(row.grand_total)
        );
    }
    html.push_str("</tbody></table>");
    html
}

fn section(title: &str, content: &str) -> String {
    format!(
        "<section class=\"row\"><h6 class=\"subtitle\">{}</h6>{}</section>",
        esc(title),
        content
    )
}

fn diagnostic(message: &str) -> String {
    format!("<h3 class=\"diagnostic\">{}</h3>", esc(message))
}

fn layout(title: &str, body: &str) -> String {
    let mut nav = String::new();
    for page in Page::ALL {
        let _ = write!(nav, "<a href=\"{}\">{}</a>", page.path(), page.title());
    }
    let _ = write!(nav, "<a href=\"{BASE_PATH}/full-view\">Full View</a>");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width">
    <title>KPI Completion Report - {title}</title>
    <style>{css}</style>
</head>
<body>
    <header><span class="brand">KPI Completion Report</span><nav>{nav}</nav></header>
    <main class="sub_page">{body}</main>
</body>
</html>"#,
        title = esc(title),
        css = PAGE_CSS,
        nav = nav,
        body = body,
    )
}

const PAGE_CSS: &str = "body{margin:0;font-family:Arial,sans-serif;background:#F4F6F9}\
header{display:flex;align-items:center;justify-content:space-between;padding:12px 24px;background:#fff;border-bottom:1px solid #ddd}\
nav a{margin-left:16px;color:#430099;text-decoration:none}\
.sub_page{padding:16px 24px}.subtitle{font-size:14px;text-transform:uppercase;color:#555}\
table.kpi{margin:20px auto;width:80%;font-size:14px;border-collapse:collapse;background:#fff}\
table.kpi th,table.kpi td{border:1px solid #ddd;padding:6px}\
.diagnostic{color:red;text-align:center}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_fallback_decodes_every_byte() {
        assert_eq!(decode(b"caf\xe9".to_vec()), "café");
        assert_eq!(decode("café".as_bytes().to_vec()), "café");
    }

    #[test]
    fn layout_links_every_page() {
        let html = layout("Overview", "<p>body</p>");
        for page in Page::ALL {
            assert!(html.contains(page.path()));
        }
        assert!(html.contains("/kpi-dashboard/full-view"));
    }
}
