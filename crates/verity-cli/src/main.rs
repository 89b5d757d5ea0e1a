//! `verity`: command-line client for the Verity truth layer.
//!
//! # Usage
//!
//! ```
//! verity --url http://localhost:7420 submit observation.json
//! verity snapshot ent_6f1c...
//! verity provenance ent_6f1c... employees
//! verity resolve company "ACME Corp."
//! ```

mod client;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use verity_core::{
  Submission,
  canonical::Canonicalizer,
  identity::{EntityId, resolve_entity_id},
  schema::SchemaRegistry,
};

const DEFAULT_URL: &str = "http://localhost:7420";
const DEFAULT_REGISTRY: &str = "config/registry.toml";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "verity", about = "Command-line client for the Verity truth layer")]
struct Args {
  /// Path to a TOML config file (url, registry).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the verity server (default: http://localhost:7420).
  #[arg(long, env = "VERITY_URL")]
  url: Option<String>,

  /// Log requests to stderr.
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Submit a JSON submission (or an array of them) from a file.
  Submit { file: PathBuf },
  /// Print the latest snapshot of an entity.
  Snapshot { entity_id: String },
  /// Show which observation a snapshot field came from.
  Provenance { entity_id: String, field: String },
  /// List the observations of an entity, most recent first.
  Observations {
    entity_id: String,
    #[arg(long)]
    field:     Option<String>,
  },
  /// Print every snapshot of an entity, oldest first.
  History { entity_id: String },
  /// Replay an entity's observations and compare against its snapshot.
  Verify { entity_id: String },
  /// Compute an entity id offline from a registry file.
  Resolve {
    entity_type: String,
    value:       String,
    /// Registry file (default: config/registry.toml).
    #[arg(long, env = "VERITY_REGISTRY")]
    registry:    Option<PathBuf>,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  registry: Option<PathBuf>,
}

fn load_config_file(path: Option<&Path>) -> Result<ConfigFile> {
  let Some(path) = path else {
    return Ok(ConfigFile::default());
  };
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading config file {}", path.display()))?;
  toml::from_str(&raw).context("parsing config file")
}

/// CLI flag, then config file, then the default.
fn base_url(flag: Option<String>, file: &ConfigFile) -> String {
  flag
    .or_else(|| (!file.url.is_empty()).then(|| file.url.clone()))
    .unwrap_or_else(|| DEFAULT_URL.to_string())
}

// ─── Offline resolution ───────────────────────────────────────────────────────

/// Canonicalise `value` with the identity field rules of the active
/// `entity_type` schema and derive its entity id.
fn resolve_id(
  registry: &SchemaRegistry,
  entity_type: &str,
  value: &str,
) -> Result<EntityId> {
  let schema = registry.active(entity_type)?;
  let canonical = Canonicalizer::new(registry).canonicalize(
    entity_type,
    &schema.identity_field,
    &Value::String(value.to_owned()),
  )?;
  Ok(resolve_entity_id(entity_type, &canonical.to_string()))
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_submissions(path: &Path) -> Result<Vec<Submission>> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  let value: Value = serde_json::from_str(&raw)
    .with_context(|| format!("parsing {}", path.display()))?;
  let submissions = match value {
    Value::Array(items) => items
      .into_iter()
      .map(serde_json::from_value)
      .collect::<Result<Vec<Submission>, _>>(),
    other => serde_json::from_value(other).map(|s| vec![s]),
  };
  submissions.with_context(|| format!("{} is not a valid submission", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  let default_level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy(),
    )
    .init();

  let file_cfg = load_config_file(args.config.as_deref())?;

  // `resolve` never touches the client.
  let client = ApiClient::new(ApiConfig { base_url: base_url(args.url, &file_cfg) })?;

  match args.command {
    Command::Submit { file } => {
      let mut receipts = Vec::new();
      for submission in read_submissions(&file)? {
        receipts.push(client.submit(&submission).await?);
      }
      match receipts.as_slice() {
        [one] => print_json(one),
        many => print_json(&many),
      }
    }
    Command::Snapshot { entity_id } => {
      print_json(&client.snapshot(&EntityId::parse(&entity_id)?).await?)
    }
    Command::Provenance { entity_id, field } => {
      print_json(&client.provenance(&EntityId::parse(&entity_id)?, &field).await?)
    }
    Command::Observations { entity_id, field } => {
      let id = EntityId::parse(&entity_id)?;
      print_json(&client.observations(&id, field.as_deref()).await?)
    }
    Command::History { entity_id } => {
      print_json(&client.history(&EntityId::parse(&entity_id)?).await?)
    }
    Command::Verify { entity_id } => {
      let report = client.verify(&EntityId::parse(&entity_id)?).await?;
      print_json(&report)?;
      if !report.matches {
        anyhow::bail!("replayed snapshot does not match the stored snapshot");
      }
      Ok(())
    }
    Command::Resolve { entity_type, value, registry } => {
      let path = registry
        .or(file_cfg.registry)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY));
      let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading registry {}", path.display()))?;
      let registry = SchemaRegistry::from_toml_str(&raw)
        .with_context(|| format!("parsing registry {}", path.display()))?;
      let id = resolve_id(&registry, &entity_type, &value)?;
      print_json(&serde_json::json!({ "entity_type": entity_type, "entity_id": id }))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const REGISTRY: &str = r#"
    [[schemas]]
    entity_type    = "company"
    version        = 1
    identity_field = "name"

    [schemas.fields.name]
    type             = "legal_name"
    case_insensitive = true
    merge            = { strategy = "last_write_wins" }
  "#;

  #[test]
  fn resolve_ignores_legal_suffix_and_case() {
    let registry = SchemaRegistry::from_toml_str(REGISTRY).unwrap();
    let a = resolve_id(&registry, "company", "ACME Corp.").unwrap();
    let b = resolve_id(&registry, "company", "  acme corporation ").unwrap();
    assert_eq!(a, b);
    assert!(resolve_id(&registry, "person", "x@example.com").is_err());
  }

  #[test]
  fn url_precedence_is_flag_then_file_then_default() {
    let file = ConfigFile { url: "http://file:1".into(), registry: None };
    assert_eq!(base_url(Some("http://flag:2".into()), &file), "http://flag:2");
    assert_eq!(base_url(None, &file), "http://file:1");
    assert_eq!(base_url(None, &ConfigFile::default()), DEFAULT_URL);
  }

  #[test]
  fn cli_parses_subcommands() {
    let args = Args::try_parse_from([
      "verity", "observations", "ent_00000000000000000000000000000000", "--field", "name",
    ])
    .unwrap();
    assert!(matches!(
      args.command,
      Command::Observations { field: Some(ref f), .. } if f == "name"
    ));
  }
}
