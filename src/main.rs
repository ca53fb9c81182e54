use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use entity_sdk::remote::NamespaceConditions;
use entity_sdk::{Config, Direction, Entity, QuerySpec, Sdk};
use serde_json::Value;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "entsdk")]
#[command(about = "Query and manage entities on a remote entity service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/entsdk/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one entity by id
  Get { object_type: String, id: String },

  /// Fetch one entity by unique name
  Uname {
    object_type: String,
    name: String,
    /// Namespace condition, e.g. --ns parent_id=12
    #[arg(long = "ns", value_parser = parse_pair)]
    namespace: Vec<(String, Value)>,
  },

  /// Run a query and print one page of results
  Query {
    object_type: String,
    /// Equality condition, e.g. --where status=open
    #[arg(long = "where", value_parser = parse_pair)]
    conditions: Vec<(String, Value)>,
    /// Sort field, append :desc for descending order
    #[arg(long)]
    order: Option<String>,
    #[arg(long, default_value_t = entity_sdk::query::DEFAULT_LIMIT)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
  },

  /// Print the grouping tree of a grouping field
  Groupings { object_type: String, field: String },

  /// Delete an entity by id
  Delete { object_type: String, id: String },
}

/// Parse `field=value`. Values that read as JSON (numbers, booleans) keep their type.
fn parse_pair(raw: &str) -> std::result::Result<(String, Value), String> {
  let (field, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected field=value, got '{}'", raw))?;
  if field.is_empty() {
    return Err(format!("missing field name in '{}'", raw));
  }
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((field.to_string(), value))
}

fn init_logging() -> Option<WorkerGuard> {
  let dir = dirs::data_dir()?.join("entsdk");
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::never(&dir, "entsdk.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_env("ENTSDK_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Some(guard)
}

fn entity_json(sdk: &Sdk, entity: &Entity) -> Value {
  Value::Object(sdk.codec().encode(entity))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_logging();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let sdk = Sdk::connect(&config)?;

  match args.command {
    Command::Get { object_type, id } => {
      let entity = sdk
        .get_entity(&object_type, &id)
        .await?
        .ok_or_else(|| eyre!("{} {} not found", object_type, id))?;
      print_json(&entity_json(&sdk, &entity))?;
    }

    Command::Uname {
      object_type,
      name,
      namespace,
    } => {
      let namespace: NamespaceConditions = namespace.into_iter().collect();
      let entity = sdk
        .get_entity_by_unique_name(&object_type, &name, &namespace)
        .await?
        .ok_or_else(|| eyre!("{} named {} not found", object_type, name))?;
      print_json(&entity_json(&sdk, &entity))?;
    }

    Command::Query {
      object_type,
      conditions,
      order,
      limit,
      offset,
    } => {
      let mut spec = QuerySpec::new(&object_type);
      for (field, value) in conditions {
        spec.and_where(field).equals(value);
      }
      if let Some(order) = order {
        match order.split_once(':') {
          Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => {
            spec.order_by(field, Direction::Desc);
          }
          Some((field, _)) => {
            spec.order_by(field, Direction::Asc);
          }
          None => {
            spec.order_by(order.as_str(), Direction::Asc);
          }
        }
      }
      spec.set_limit(limit).set_offset(offset);

      let mut page = sdk.create_result_page(spec);
      page.load().await?;

      let entities: Vec<Value> = page.iter().map(|e| entity_json(&sdk, e)).collect();
      print_json(&serde_json::json!({
        "total_num": page.total_count(),
        "num": entities.len(),
        "offset": page.offset(),
        "entities": entities,
      }))?;
    }

    Command::Groupings {
      object_type,
      field,
    } => {
      let groups = sdk.get_groupings(&object_type, &field).await?;
      let groups: Vec<Value> = groups.iter().map(|g| g.to_wire()).collect();
      print_json(&Value::Array(groups))?;
    }

    Command::Delete { object_type, id } => {
      let mut entity = Entity::new(&object_type);
      entity.set("id", id.as_str());
      let removed = sdk.delete_entity(&entity).await?;
      print_json(&serde_json::json!({ "removed": removed }))?;
    }
  }

  Ok(())
}
