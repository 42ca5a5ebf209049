use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rxforms::cache::{DirectorySource, TemplateCache};
use rxforms::mapper::{build_from_form, FormMapper, MarkupTemplates, ValueTree};
use rxforms::naming::{compose_base_name, MemoryNameRegistry};
use rxforms::schema::SchemaTree;
use rxforms::settings::Settings;
use rxforms::template::Context;
use rxforms::{Result, RxformsError};

#[derive(Parser)]
#[command(name = "rxforms", about = "Render pricing templates, forms and names from local files")]
struct Cli {
    /// Settings file (defaults to ./rxforms.toml when present)
    #[arg(long, env = "RXFORMS_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template with a JSON object as context
    Render {
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Print the edit form for a schema, prefilled from stored values
    Form {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        values: Option<PathBuf>,
    },
    /// Print the summary markup for stored values
    Display {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        values: PathBuf,
    },
    /// Turn a submitted form (JSON object of field names) into stored values
    ParseForm {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        form: PathBuf,
    },
    /// Compose a unique name from labels
    Name {
        #[arg(long = "label", required = true)]
        labels: Vec<String>,
        /// Effective date (YYYY-MM-DD) supplying the year
        #[arg(long)]
        effective_date: Option<NaiveDate>,
        /// JSON object of existing names keyed by record id
        #[arg(long)]
        existing: Option<PathBuf>,
        /// Record id to ignore when checking, as in updates
        #[arg(long)]
        exclude: Option<String>,
    },
}

fn read(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_str(&read(path)?)?)
}

async fn mapper(settings: &Settings) -> Result<FormMapper> {
    let templates = match &settings.cache.template_dir {
        Some(dir) => {
            let cache = TemplateCache::new(DirectorySource::new(dir), settings.cache.max_bytes);
            MarkupTemplates::load(&cache).await?
        }
        None => MarkupTemplates::default(),
    };
    Ok(FormMapper::new(settings.renderer(), templates))
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    info!(mode = ?settings.render.mode, "settings loaded");
    match cli.command {
        Command::Render { template, context } => {
            let context = match context {
                Some(path) => Context::from_json(&read_json(&path)?),
                None => Context::new(),
            };
            println!("{}", settings.renderer().render(&read(&template)?, &context));
        }
        Command::Form { schema, values } => {
            let schema = SchemaTree::from_json(&read(&schema)?)?;
            let values = match values {
                Some(path) => ValueTree::parse(&read(&path)?)?,
                None => ValueTree::new(),
            };
            println!("{}", mapper(&settings).await?.form_html(&schema, &values));
        }
        Command::Display { schema, values } => {
            let schema = SchemaTree::from_json(&read(&schema)?)?;
            let values = ValueTree::parse(&read(&values)?)?;
            println!("{}", mapper(&settings).await?.display_html(&schema, &values));
        }
        Command::ParseForm { schema, form } => {
            let schema = SchemaTree::from_json(&read(&schema)?)?;
            let form = match read_json(&form)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let values = build_from_form(&form, &schema);
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        Command::Name { labels, effective_date, existing, exclude } => {
            let registry = MemoryNameRegistry::new();
            if let Some(path) = existing {
                let Value::Object(names) = read_json(&path)? else {
                    return Err(RxformsError::Config("existing names must be a JSON object keyed by id".into()));
                };
                for (id, name) in names {
                    registry.insert(id, name.as_str().unwrap_or_default())?;
                }
            }
            let base = compose_base_name(&labels, effective_date);
            let name = settings.name_generator().unique_name(&base, &registry, exclude.as_deref()).await?;
            println!("{}", name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    run(Cli::parse()).await
}
