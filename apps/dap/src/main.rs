//! # DAP Binary
//!
//! Entry point for the `dap` command: database setup, catalog seeding,
//! plan management, telemetry import and the HTTP server.

use clap::{Parser, Subcommand};
use dap::api;
use dap::cli;
use dap::config::{DEFAULT_DB, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RATE_LIMIT, ServerConfig};
use dap_core::model::new_id;
use dap_core::{CustomerProduct, DapError, DataType, LicenseLevel};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dap", version, about = "Dynamic adoption plans")]
struct Cli {
    /// Database file
    #[arg(long, global = true, env = "DAP_DB", default_value = DEFAULT_DB)]
    db: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty database
    Init {
        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Load products and tasks from a catalog JSON file
    Seed { catalog: PathBuf },

    /// Assign a product to a customer
    Assign {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        product: String,
        /// Display name (defaults to the product id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "ESSENTIAL")]
        license: LicenseLevel,
        /// Outcome filter, repeatable
        #[arg(long = "outcome")]
        outcomes: Vec<String>,
        /// Release filter, repeatable
        #[arg(long = "release")]
        releases: Vec<String>,
        /// Customer product id (generated when absent)
        #[arg(long)]
        id: Option<String>,
    },

    /// Adoption plan operations
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Evaluate a value against criteria JSON
    Evaluate {
        #[arg(long)]
        value: Option<String>,
        #[arg(long = "type")]
        data_type: DataType,
        /// Criteria JSON, canonical or legacy shape
        #[arg(long)]
        criteria: String,
    },

    /// Import a telemetry rows file into a plan
    Import { plan: String, rows: PathBuf },

    /// Rewrite stored legacy criteria to the canonical shape
    MigrateCriteria,

    /// Run the HTTP server
    Serve {
        #[arg(long, env = "DAP_HOST", default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, env = "DAP_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Requests per second, 0 disables limiting
        #[arg(long, env = "DAP_RATE_LIMIT", default_value_t = DEFAULT_RATE_LIMIT)]
        rate_limit: u32,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Create the plan of a customer product
    Create { customer_product: String },
    /// Reconcile a plan against its product definition
    Sync { plan: String },
    /// Show a plan and its tasks
    Show {
        plan: String,
        #[arg(long)]
        include_removed: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DapError> {
    let db = cli.db.as_path();
    let json = cli.json;

    match cli.command {
        Command::Init { force } => cli::cmd_init(db, force),
        Command::Seed { catalog } => cli::cmd_seed(db, &catalog, json),
        Command::Assign {
            customer,
            product,
            name,
            license,
            outcomes,
            releases,
            id,
        } => {
            let customer_product = CustomerProduct {
                id: id.unwrap_or_else(new_id),
                customer_id: customer,
                name: name.unwrap_or_else(|| product.clone()),
                product_id: product,
                license_level: license,
                selected_outcome_ids: outcomes,
                selected_release_ids: releases,
            };
            cli::cmd_assign(db, &customer_product, json)
        }
        Command::Plan { action } => match action {
            PlanAction::Create { customer_product } => {
                cli::cmd_plan_create(db, &customer_product, json)
            }
            PlanAction::Sync { plan } => cli::cmd_plan_sync(db, &plan, json),
            PlanAction::Show {
                plan,
                include_removed,
            } => cli::cmd_plan_show(db, &plan, include_removed, json),
        },
        Command::Evaluate {
            value,
            data_type,
            criteria,
        } => cli::cmd_evaluate(value.as_deref(), data_type, &criteria, json).map(|_| ()),
        Command::Import { plan, rows } => cli::cmd_import(db, &plan, &rows, json).map(|_| ()),
        Command::MigrateCriteria => cli::cmd_migrate_criteria(db, json),
        Command::Serve {
            host,
            port,
            rate_limit,
        } => {
            let config = ServerConfig {
                db: cli.db.clone(),
                host,
                port,
                rate_limit,
            };
            api::serve(&config).await
        }
    }
}
