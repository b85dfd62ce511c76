// Entry point and high-level CLI flow.
//
// - `run` refreshes every output from the input CSVs.
// - `serve` starts the web front-end over an existing output directory.
// - With no subcommand, a refresh runs first and the front-end starts after.
use clap::{Args, Parser, Subcommand};
use kpi_dashboard::config::{
    parse_alias, AppConfig, DashboardParameters, PresentationConfig, PARAMETERS_FILE,
};
use kpi_dashboard::error::AppError;
use kpi_dashboard::output::preview_table_rows;
use kpi_dashboard::pipeline::{run_all, FileStaging, InMemoryStaging, PipelineConfig};
use kpi_dashboard::rates::PolicyMaxima;
use kpi_dashboard::reports;
use kpi_dashboard::telemetry;
use kpi_dashboard::types::CompletionRateRecord;
use kpi_dashboard::util::{format_int, format_percent};
use kpi_dashboard::web::{self, WebState};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kpi_dashboard",
    about = "Compute KPI form completion rates and serve the reporting dashboard",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh the pipeline outputs and HTML fragments
    Run(RunArgs),
    /// Serve the dashboard over previously generated outputs
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Parameters file with `year_to_analyze` and `current_month`
    #[arg(long, default_value = PARAMETERS_FILE)]
    params: PathBuf,
    /// Override the year to analyze
    #[arg(long)]
    year: Option<i32>,
    /// Override the current month (1-12)
    #[arg(long)]
    month: Option<u32>,
    /// Events CSV (defaults to the input directory's export)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Site reference CSV (defaults to the input directory's reference table)
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Output directory
    #[arg(long)]
    output: Option<PathBuf>,
    /// Keep intermediate tables in memory instead of staging them on disk
    #[arg(long)]
    in_memory: bool,
    /// Rename a pivot site before joining reference data (FROM=TO, repeatable)
    #[arg(long = "site-alias", value_parser = parse_alias)]
    site_aliases: Vec<(String, String)>,
    /// Rename a country before the per-country aggregation (FROM=TO, repeatable)
    #[arg(long = "country-alias", value_parser = parse_alias)]
    country_aliases: Vec<(String, String)>,
    /// Annual Environment form maximum
    #[arg(long)]
    environment_max: Option<u32>,
    /// Annual Health & Safety form maximum
    #[arg(long)]
    health_safety_max: Option<u32>,
    /// Annual Social form maximum
    #[arg(long)]
    social_max: Option<u32>,
    /// Print the first N rows of the rate table
    #[arg(long)]
    preview: Option<usize>,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the rendered fragments (defaults to the output assets)
    #[arg(long)]
    assets: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    match cli.command {
        Some(Command::Run(args)) => handle_run(&config, args),
        Some(Command::Serve(args)) => handle_serve(&mut config, args).await,
        None => {
            let args = RunArgs {
                params: PathBuf::from(PARAMETERS_FILE),
                ..RunArgs::default()
            };
            handle_run(&config, args)?;
            handle_serve(&mut config, ServeArgs::default()).await
        }
    }
}

fn pipeline_config(app: &AppConfig, args: &RunArgs) -> Result<PipelineConfig, AppError> {
    let mut parameters = DashboardParameters::load(&args.params)?;
    if let Some(year) = args.year {
        parameters.year_to_analyze = year;
    }
    if let Some(month) = args.month {
        parameters.current_month = month;
    }
    parameters.validate()?;

    let output_dir = args.output.clone().unwrap_or_else(|| app.output_dir.clone());
    let mut config = PipelineConfig::new(&app.input_dir, &output_dir, parameters);
    if let Some(input) = &args.input {
        config.events_path = input.clone();
    }
    if let Some(reference) = &args.reference {
        config.reference_path = reference.clone();
    }

    let defaults = PolicyMaxima::default();
    config.maxima = PolicyMaxima {
        environment: args.environment_max.unwrap_or(defaults.environment),
        health_safety: args.health_safety_max.unwrap_or(defaults.health_safety),
        social: args.social_max.unwrap_or(defaults.social),
    };
    config.maxima.validate()?;
    config.site_aliases = args.site_aliases.iter().cloned().collect();

    let mut presentation = PresentationConfig::default();
    presentation
        .country_aliases
        .extend(args.country_aliases.iter().cloned());
    config.presentation = presentation;
    Ok(config)
}

/// Refresh every output and print a short summary.
fn handle_run(app: &AppConfig, args: RunArgs) -> Result<(), AppError> {
    let config = pipeline_config(app, &args)?;
    println!(
        "Processing {} for {} (month {})...",
        config.events_path.display(),
        config.parameters.year_to_analyze,
        config.parameters.current_month
    );

    let (output, summary) = if args.in_memory {
        run_all(&config, &mut InMemoryStaging)?
    } else {
        run_all(&config, &mut FileStaging::new(&config.output_dir))?
    };

    println!(
        "{} events loaded ({} submitted), {} sites rated, {} without reference data.",
        format_int(summary.total_events),
        format_int(summary.submitted_events),
        format_int(summary.total_sites),
        format_int(summary.unmatched_sites)
    );
    println!(
        "Average Grand Total: {}",
        summary
            .avg_grand_total
            .map(|v| format_percent(Some(v)))
            .unwrap_or_else(|| "n/a".to_string())
    );
    if let Some(rows) = args.preview {
        let records: Vec<CompletionRateRecord> =
            output.rates.iter().map(CompletionRateRecord::from).collect();
        preview_table_rows("Completion Rates with Activity and Region", &records, rows);
        let regions = reports::region_averages(&output.rates, &config.presentation.region_order);
        preview_table_rows("Average Completion Rates by Region", &regions, rows);
    }
    println!("(Full table exported to {})\n", config.rates_path().display());
    Ok(())
}

async fn handle_serve(app: &mut AppConfig, mut args: ServeArgs) -> Result<(), AppError> {
    if let Some(host) = args.host.take() {
        app.server.host = host;
    }
    if let Some(port) = args.port.take() {
        app.server.port = port;
    }
    let state = WebState {
        assets_dir: args.assets.unwrap_or_else(|| app.assets_dir()),
        rates_path: app.output_dir.join(kpi_dashboard::pipeline::RATES_FILE),
        region_order: PresentationConfig::default().region_order,
    };
    web::serve(&app.server, state).await
}
