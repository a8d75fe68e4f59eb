use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use metrics::histogram;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crudkit_api::{EventBus, MockApi, ModelService, Pagination};
use crudkit_core::{EngineConfig, FieldChange};
use crudkit_form::{FormError, FormMode, FormOrchestrator};
use crudkit_schema::ModelSchema;
use crudkit_table::{build_columns, load_list_filters, Cell, FilterSpec, TableView};
use crudkit_widgets::{DispatchTable, WidgetKind};

#[derive(Parser, Debug)]
#[command(name = "crudctl", version, about = "crudkit CLI: forms and tables from schema metadata")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Fixture file (JSON or YAML): `{ schemas: {model: schema}, records: {model: [..]} }`
    #[arg(long = "fixtures", global = true, env = "CRUDKIT_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Schema file for the model (JSON or YAML), overriding the fixture schema
    #[arg(long = "schema", global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decorate a form and print its widgets
    Form {
        model: String,
        /// Edit the record with this id instead of inserting
        #[arg(long = "id")]
        id: Option<String>,
        /// Field edits, `name=value` (value parsed as JSON, else taken as text)
        #[arg(long = "set")]
        set: Vec<String>,
    },
    /// Print table columns, with list filters loaded from the fixture records
    Columns { model: String },
    /// Fill a form and submit it against the fixtures
    Submit {
        model: String,
        #[arg(long = "id")]
        id: Option<String>,
        #[arg(long = "set")]
        set: Vec<String>,
    },
    /// List records through a table view
    Ls {
        model: String,
        /// Column filters, `column=value`
        #[arg(long = "filter")]
        filter: Vec<String>,
        #[arg(long = "page", default_value_t = 1)]
        page: usize,
        #[arg(long = "size", default_value_t = 20)]
        size: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("CRUDKIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CRUDKIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CRUDKIT_METRICS_ADDR; expected host:port");
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
}

fn read_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if is_yaml(path) {
        let y: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing YAML {}", path.display()))?;
        serde_json::to_value(y).context("converting YAML to JSON")
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing JSON {}", path.display()))
    }
}

fn load_schema(path: &Path, model: &str) -> Result<ModelSchema> {
    if is_yaml(path) {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        crudkit_schema::parse_model_schema_yaml(model, &text)
    } else {
        crudkit_schema::parse_model_schema(model, &read_document(path)?)
    }
}

/// Mock backend from fixtures, with the `--schema` file (if any) registered for `model`.
fn build_api(cli: &Cli, model: &str) -> Result<Arc<MockApi>> {
    let mut api = match &cli.fixtures {
        Some(path) => MockApi::from_fixture(&read_document(path)?).with_context(|| format!("fixtures {}", path.display()))?,
        None => MockApi::new(),
    };
    if let Some(path) = &cli.schema {
        let schema = load_schema(path, model)?;
        info!(model, fields = schema.fields.len(), "schema loaded from file");
        api.schemas.insert(model.to_string(), schema);
    }
    if !api.schemas.contains_key(model) {
        bail!("no schema for model {}; pass --schema or --fixtures", model);
    }
    Ok(Arc::new(api))
}

fn parse_value(raw: &str) -> Value { serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())) }

fn parse_assignments(items: &[String]) -> Result<Vec<(String, Value)>> {
    items
        .iter()
        .map(|s| {
            let (k, v) = s.split_once('=').ok_or_else(|| anyhow!("expected name=value, got {:?}", s))?;
            Ok((k.trim().to_string(), parse_value(v)))
        })
        .collect()
}

fn mode_for(id: &Option<String>) -> FormMode {
    match id {
        Some(id) => FormMode::Edit { id: parse_value(id) },
        None => FormMode::Insert,
    }
}

async fn open_form(api: &Arc<MockApi>, model: &str, id: &Option<String>, set: &[String]) -> Result<FormOrchestrator> {
    let fields = api.schemas.get(model).map(|s| s.fields.clone()).unwrap_or_default();
    let svc: Arc<dyn ModelService> = api.clone();
    let mut form = FormOrchestrator::new(model, fields, svc, mode_for(id)).with_config(EngineConfig::from_env()).with_bus(EventBus::new());
    form.init().await.with_context(|| format!("opening {} form", model))?;
    let changes: Vec<FieldChange> = parse_assignments(set)?.into_iter().map(|(k, v)| FieldChange::value(k, v)).collect();
    if !changes.is_empty() {
        let ran = form.on_field_change(&changes).await?;
        info!(model, changes = changes.len(), async_pass = ran, "form: edits applied");
    }
    Ok(form)
}

fn widget_name(kind: &WidgetKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.get("widget").and_then(|w| w.as_str()).map(|s| s.to_string()))
        .unwrap_or_else(|| "?".to_string())
}

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Text { text } => text.clone(),
        Cell::Bool { value } => value.map(|b| if b { "yes" } else { "no" }.to_string()).unwrap_or_default(),
        Cell::Assets { urls, .. } => urls.join(" "),
        Cell::Relation { label, .. } => label.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let t0 = Instant::now();

    match &cli.command {
        Commands::Form { model, id, set } => {
            let api = build_api(&cli, model)?;
            let form = open_form(&api, model, id, set).await?;
            let table = DispatchTable::new(EngineConfig::from_env());
            let widgets = form.widgets(&table);
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<12} {:<8} {:<24} ERRORS", "FIELD", "WIDGET", "EDIT", "VALUE");
                    for w in &widgets {
                        let value = if w.frame.value.is_null() { String::new() } else { w.frame.value.to_string() };
                        println!("{:<16} {:<12} {:<8} {:<24} {}", w.frame.name, widget_name(&w.kind), w.frame.editable, value, w.frame.errors.join("; "));
                        if let WidgetKind::Diagnostic { reason, .. } = &w.kind {
                            println!("  ! {}", reason);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&widgets)?),
            }
        }
        Commands::Columns { model } => {
            let api = build_api(&cli, model)?;
            let metas = api.schemas.get(model).map(|s| s.columns.clone()).unwrap_or_default();
            let columns = load_list_filters(api.as_ref(), model, build_columns(&metas)).await;
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<20} {:<7} FILTER", "KEY", "TITLE", "SORT");
                    for c in &columns {
                        let filter = match &c.filter {
                            None => String::new(),
                            Some(FilterSpec::Like { .. }) => "like".to_string(),
                            Some(FilterSpec::Boolean { .. }) => "boolean".to_string(),
                            Some(FilterSpec::List { options, .. }) => {
                                format!("list [{}]", options.iter().map(|o| o.text.as_str()).collect::<Vec<_>>().join(", "))
                            }
                        };
                        println!("{:<16} {:<20} {:<7} {}", c.key, c.title, c.sorter, filter);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&columns)?),
            }
        }
        Commands::Submit { model, id, set } => {
            let api = build_api(&cli, model)?;
            let mut form = open_form(&api, model, id, set).await?;
            match form.on_submit().await {
                Ok(entity) => match cli.output {
                    Output::Human => println!("saved {} {}", model, entity.get("id").map(|v| v.to_string()).unwrap_or_default()),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&entity)?),
                },
                Err(e @ (FormError::Invalid { .. } | FormError::Rejected { .. })) => {
                    let errors: Map<String, Value> = form
                        .fields()
                        .iter()
                        .filter(|f| f.has_errors())
                        .map(|f| (f.name.clone(), Value::from(f.errors.to_vec())))
                        .collect();
                    match cli.output {
                        Output::Human => {
                            for (name, msgs) in &errors {
                                eprintln!("{}: {}", name, msgs);
                            }
                        }
                        Output::Json => println!("{}", serde_json::to_string_pretty(&errors)?),
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(anyhow!(e).context(format!("submitting {}", model))),
            }
        }
        Commands::Ls { model, filter, page, size } => {
            let api = build_api(&cli, model)?;
            let metas = api.schemas.get(model).map(|s| s.columns.clone()).unwrap_or_default();
            let mut view = TableView::new(model.clone(), metas, api.clone(), EventBus::new());
            view.set_filters(parse_assignments(filter)?.into_iter().collect());
            view.set_pagination(Pagination { page: *page, size: *size });
            if let Err(e) = view.load().await {
                warn!(model = %model, error = %e, "ls: load failed");
                return Err(anyhow!(e).context(format!("listing {}", model)));
            }
            match cli.output {
                Output::Human => {
                    println!("{}", view.columns().iter().map(|c| format!("{:<16}", c.title)).collect::<String>());
                    for row in view.rows() {
                        println!("{}", row.iter().map(|c| format!("{:<16}", cell_text(c))).collect::<String>());
                    }
                    let p = view.page().pagination;
                    println!("page {} of {} rows", p.page, p.total);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&view.rows())?),
            }
        }
    }
    histogram!("crudctl_command_ms", t0.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
