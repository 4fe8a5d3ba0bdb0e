use clap::{Parser, Subcommand};
use color_eyre::Result;
use grc_models::config::Config;
use grc_models::model::{
  BatchedList, InstanceRef, ListEvent, ModelType, ModelTypeBuilder, Registry, Store,
};
use grc_models::transport::HttpTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grcm")]
#[command(about = "Browse GRC records through the cached model layer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/grcm/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the configured model types and their names
  Types,
  /// Fetch a collection, reporting each batch as it lands
  FindAll {
    /// Model name (e.g. Control, control or controls)
    model: String,
    /// Query parameters as key=value
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Fetch a single record
  FindOne { model: String, id: i64 },
  /// Fetch a record, then refresh it from its self link
  Refresh { model: String, id: i64 },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Log to a file in the user data directory, or stderr if there is none.
fn init_logging() -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env("GRCM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|p| p.join("grcm"));

  match log_dir {
    Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
      let appender = tracing_appender::rolling::never(dir, "grcm.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    _ => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

fn print_instance(instance: &InstanceRef) -> Result<()> {
  let json = serde_json::to_string_pretty(&instance.serialize())?;
  println!("{}", json);
  Ok(())
}

async fn find_all(store: &Store, model: &Arc<ModelType>, params: Vec<(String, String)>) -> Result<()> {
  let list = BatchedList::new();
  let mut events = list.subscribe();

  let reporter = tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      match event {
        ListEvent::BatchInserted { start, items } => {
          info!(start, count = items.len(), "batch inserted");
        }
        ListEvent::Complete { len } => {
          info!(len, "list complete");
          break;
        }
      }
    }
  });

  let list = store.find_all_into(model, params, list)?.await?;
  if let Err(e) = reporter.await {
    warn!(error = %e, "batch reporter stopped");
  }

  for instance in list.items() {
    println!("{}", instance);
  }
  println!("{} {}", list.len(), model.names().title_plural);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let transport = HttpTransport::new(&config.server.url, Config::api_token())?;

  let registry = Arc::new(Registry::new());
  for decl in config.models.iter().cloned() {
    ModelTypeBuilder::from(decl).setup(&registry)?;
  }

  let store = Store::with_settings(Arc::new(transport), Arc::clone(&registry), config.store_settings());

  if let Some(endpoint) = &config.custom_attribute_definitions {
    match store.load_custom_attribute_definitions(endpoint).await {
      Ok(count) => info!(count, "loaded custom attribute definitions"),
      Err(e) => warn!(error = %e, "could not load custom attribute definitions"),
    }
  }

  match args.command {
    Command::Types => {
      for model in registry.models() {
        let endpoint = model
          .endpoints()
          .find_all
          .as_ref()
          .map(|e| e.to_string())
          .unwrap_or_default();
        println!(
          "{:<24} {:<24} {}",
          model.model_name(),
          model.names().title_plural,
          endpoint
        );
      }
    }
    Command::FindAll { model, params } => {
      let model = registry.find_model(&model)?;
      find_all(&store, &model, params).await?;
    }
    Command::FindOne { model, id } => {
      let model = registry.find_model(&model)?;
      let instance = store.find_one(&model, id).await?;
      print_instance(&instance)?;
    }
    Command::Refresh { model, id } => {
      let model = registry.find_model(&model)?;
      let instance = store.find_one(&model, id).await?;
      let instance = store.refresh(&instance).await?;
      print_instance(&instance)?;
    }
  }

  registry.teardown();
  Ok(())
}
