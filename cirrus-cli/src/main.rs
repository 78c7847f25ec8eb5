use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use cirrus_core::lock::LockRegistry;
use cirrus_core::provider::Provider;
use cirrus_core::resource::{Resource, ResourceId, State, Value};
use cirrus_core::schema::ResourceSchema;
use cirrus_provider_azurestack::nat_pool::{NatPoolAddress, import_nat_pool};
use cirrus_provider_azurestack::schemas::{self, nat_pool::RESOURCE_TYPE};
use cirrus_provider_azurestack::{AzureStackConfig, AzureStackProvider};

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Manage Azure Stack load balancer NAT pools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a desired state file without contacting Azure Stack
    Validate {
        /// Path to a JSON file of lb_nat_pool attributes
        file: PathBuf,
    },
    /// Create or update the NAT pool described by a desired state file
    Apply {
        /// Path to a JSON file of lb_nat_pool attributes
        file: PathBuf,
    },
    /// Show the current state of a NAT pool
    Read {
        /// ARM ID of the NAT pool
        id: String,
    },
    /// Remove a NAT pool from its load balancer
    Delete {
        /// ARM ID of the NAT pool
        id: String,
    },
    /// Print the desired state of an existing NAT pool
    Import {
        /// ARM ID of the NAT pool
        id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Read { id } => run_read(&id).await,
        Commands::Delete { id } => run_delete(&id).await,
        Commands::Import { id } => run_import(&id),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

/// Build a provider from `ARM_*` settings; Ctrl-C cancels in-flight operations
fn build_provider() -> Result<AzureStackProvider, String> {
    let config = AzureStackConfig::from_env().map_err(|e| e.to_string())?;
    log::debug!("Using {:?}", config);

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let provider =
        AzureStackProvider::new(&config, LockRegistry::new()).map_err(|e| e.to_string())?;
    Ok(provider.with_cancellation(token))
}

fn load_resource(file: &Path) -> Result<Resource, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {}", file.display(), e))?;
    let serde_json::Value::Object(object) = json else {
        return Err(format!("{}: expected a JSON object of attributes", file.display()));
    };

    let mut attributes = HashMap::new();
    for (key, value) in object {
        let value = json_to_value(&value)
            .ok_or_else(|| format!("{}: unsupported value for '{}'", file.display(), key))?;
        attributes.insert(key, value);
    }

    let name = match attributes.get("name") {
        Some(Value::String(name)) => name.clone(),
        _ => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    Ok(Resource {
        id: ResourceId::new(RESOURCE_TYPE, name),
        attributes,
    })
}

fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
        serde_json::Value::Array(items) => {
            let items: Option<Vec<_>> = items.iter().map(json_to_value).collect();
            items.map(Value::List)
        }
        serde_json::Value::Object(map) => {
            let entries: Option<HashMap<_, _>> = map
                .iter()
                .map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect();
            entries.map(Value::Map)
        }
        serde_json::Value::Null => None,
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => value_to_json(other).to_string(),
    }
}

fn print_state(state: &State) {
    if !state.exists {
        println!("{} {} does not exist", "-".red().bold(), state.id);
        return;
    }

    println!("{} {}", "*".green().bold(), state.id);
    if let Some(identifier) = &state.identifier {
        println!("    id = {}", identifier.cyan());
    }
    let mut keys: Vec<&String> = state.attributes.keys().collect();
    keys.sort();
    for key in keys {
        println!("    {} = {}", key, format_value(&state.attributes[key]));
    }
}

fn run_validate(file: &Path) -> Result<(), String> {
    let resource = load_resource(file)?;
    let schemas = get_schemas();
    let schema = schemas
        .get(&resource.id.resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource.id.resource_type))?;

    if let Err(errors) = schema.validate(&resource.attributes) {
        let lines: Vec<String> = errors
            .iter()
            .map(|e| format!("  {} {}: {}", "✗".red(), resource.id, e))
            .collect();
        return Err(format!("Validation failed:\n{}", lines.join("\n")));
    }

    println!("{} {} is valid", "✓".green(), resource.id);
    Ok(())
}

async fn run_apply(file: &Path) -> Result<(), String> {
    let resource = load_resource(file)?;
    let provider = build_provider()?;

    println!("{}", "Applying changes...".cyan().bold());
    let state = provider.create(&resource).await.map_err(|e| e.to_string())?;
    if !state.exists {
        return Err(format!(
            "{}: the load balancer no longer exists",
            resource.id
        ));
    }

    print_state(&state);
    println!("{}", "Apply complete!".green().bold());
    Ok(())
}

async fn run_read(identifier: &str) -> Result<(), String> {
    let address = NatPoolAddress::parse(identifier).map_err(|e| e.to_string())?;
    let provider = build_provider()?;

    let id = ResourceId::new(RESOURCE_TYPE, address.pool_name);
    let state = provider
        .read(&id, Some(identifier))
        .await
        .map_err(|e| e.to_string())?;
    print_state(&state);
    Ok(())
}

async fn run_delete(identifier: &str) -> Result<(), String> {
    let address = NatPoolAddress::parse(identifier).map_err(|e| e.to_string())?;
    let provider = build_provider()?;

    let id = ResourceId::new(RESOURCE_TYPE, address.pool_name);
    provider
        .delete(&id, identifier)
        .await
        .map_err(|e| e.to_string())?;
    println!("  {} deleted {}", "✓".green(), id);
    Ok(())
}

fn run_import(identifier: &str) -> Result<(), String> {
    let resource = import_nat_pool(identifier).map_err(|e| e.to_string())?;
    println!("{}", import_json(&resource)?);
    Ok(())
}

fn import_json(resource: &Resource) -> Result<String, String> {
    let object: serde_json::Map<String, serde_json::Value> = resource
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    serde_json::to_string_pretty(&object).map_err(|e| e.to_string())
}
