use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use fieldguard::authz::{Caller, PermissionSet};
use fieldguard::config::{self, EngineConfig};
use fieldguard::demo;
use fieldguard::engine::{compose_filter, resolve_populate, select_fields, ComposedFilter, Projection};
use fieldguard::policy::Access;
use fieldguard::RequestContext;

#[derive(Parser, Debug)]
#[command(author, version, about = "fieldguard policy inspector", long_about = None)]
struct Cli {
    /// Entity to inspect
    #[arg(long, short, global = true, default_value = "posts")]
    entity: String,
    /// Operation to resolve for
    #[arg(long, short, global = true, default_value = "read")]
    access: Access,
    /// Permission granted to the caller; repeatable
    #[arg(long = "grant", short, global = true)]
    grants: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the fields the caller may select
    Fields {
        /// Requested projection, JSON or space-separated
        #[arg(long)]
        select: Option<String>,
        /// Sub-collection to resolve instead of the entity itself
        #[arg(long)]
        sub: Option<String>,
    },
    /// Print the storage filter the caller's query would run with
    Filter {
        /// Caller filter as JSON
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print the resolved populate descriptors
    Populate {
        /// Populate spec, JSON or space-separated paths
        spec: String,
    },
}

fn loose_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    config::init_tracing("warn");

    let cli = Cli::parse();

    let registry = demo::registry()?;
    let engine = EngineConfig::from_env()?;
    let caller = Caller::new(PermissionSet::from_names(cli.grants.iter().cloned()));
    let ctx = RequestContext::new(Arc::new(registry), Arc::new(engine), caller);

    match cli.command {
        Commands::Fields { select, sub } => {
            let projection = select
                .as_deref()
                .map(|raw| Projection::parse(&loose_json(raw)))
                .transpose()?
                .flatten();
            let fields = select_fields(&ctx, &cli.entity, cli.access, projection.as_ref(), sub.as_deref(), None).await?;
            println!("{}", fields.join(" "));
        }
        Commands::Filter { filter } => {
            let filter = filter.as_deref().map(serde_json::from_str::<Value>).transpose()?;
            match compose_filter(&ctx, &cli.entity, cli.access, filter).await? {
                ComposedFilter::Deny => println!("deny"),
                ComposedFilter::Filter(filter) => println!("{}", serde_json::to_string_pretty(&filter)?),
            }
        }
        Commands::Populate { spec } => {
            let spec = loose_json(&spec);
            let descriptors = resolve_populate(&ctx, &cli.entity, cli.access, Some(&spec)).await?;
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
    }

    Ok(())
}
