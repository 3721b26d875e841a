use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use pos_inventory_sync::{
    build_state, csv_import, diagnostics, init_logging,
    local_view::{LocalItemView, ViewFilter},
    orders, router, source, storage,
    sync::{SyncAction, SyncOrchestrator},
    AppConfig, AppState,
};

#[derive(Parser)]
#[command(
    name = "pos-inventory-sync",
    about = "Keep POS inventory items in sync across the store, Google Sheets and CSV",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service.
    Serve,
    /// Upsert every row of a CSV file into the store.
    Import {
        file: PathBuf,
        /// Show the first rows without writing anything.
        #[arg(long)]
        preview: bool,
    },
    /// Write the current item list as CSV.
    Export {
        /// Defaults to inventory-YYYY-MM-DD.csv in the working directory.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// sync-from-sheets, sync-to-sheets or two-way-sync.
    Sync { action: String },
    /// List items, optionally narrowed.
    Items {
        /// Read the CSV export instead of the store.
        #[arg(long)]
        fallback: bool,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        supplier: Option<String>,
        /// Print the single best match for this name.
        #[arg(long = "match", conflicts_with = "search")]
        best: Option<String>,
    },
    /// Recent orders, newest first.
    Orders {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = orders::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Manage secrets in the OS credential store.
    #[command(subcommand)]
    Secret(SecretCommands),
    /// Version, store and schema information.
    Status,
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Store a secret. Reads the value from stdin when omitted.
    Set { name: String, value: Option<String> },
    Delete { name: String },
    /// Remove every stored secret.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Secrets are managed before config is read so a missing key can be fixed.
    let command = match cli.command {
        Commands::Secret(command) => return handle_secret_command(command),
        other => other,
    };

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_logging(&diagnostics::get_log_dir(&config.data_dir));
    info!("Starting pos-inventory-sync v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(build_state(&config).context("failed to initialize service")?);

    match command {
        Commands::Serve => serve(state, config.bind).await?,
        Commands::Import { file, preview } => handle_import(&state, file, preview, cli.json).await?,
        Commands::Export { output } => handle_export(&state, output).await?,
        Commands::Sync { action } => handle_sync(&state, &action, cli.json).await?,
        Commands::Items {
            fallback,
            search,
            category,
            supplier,
            best,
        } => {
            let filter = ViewFilter {
                query: search.unwrap_or_default(),
                category,
                supplier,
            };
            handle_items(&state, fallback, filter, best, cli.json).await?
        }
        Commands::Orders { user, limit } => {
            let history = orders::list_orders(state.store.as_ref(), user.as_deref(), limit).await?;
            if cli.json {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("No orders found");
            } else {
                for order in history {
                    println!(
                        "{}  user {}  {}  {} lines, qty {}",
                        order.order_id,
                        order.user_id,
                        order.created_at.format("%Y-%m-%d %H:%M"),
                        order.lines.len(),
                        order.total_quantity
                    );
                }
            }
        }
        Commands::Status => {
            let mut status = serde_json::json!({
                "about": diagnostics::get_about_info(),
                "store": state.store.name(),
                "sheetsConfigured": state.sheets.is_some(),
                "keyMatching": state.key_matching,
            });
            if let Some(db) = &state.db {
                status["database"] =
                    diagnostics::get_db_status(db).map_err(|e| anyhow!(e))?;
            }
            print_json(&status)?;
        }
        Commands::Secret(_) => unreachable!("handled before config"),
    }

    Ok(())
}

async fn serve(state: Arc<AppState>, bind: std::net::SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("listening on http://{bind}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .context("server error")
}

async fn handle_import(state: &AppState, file: PathBuf, preview: bool, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    if preview {
        let rows = csv_import::preview(&text)?;
        if json {
            return print_json(&rows);
        }
        for item in rows {
            println!("{}\t{}\t{}", item.name, item.category, item.default_supplier);
        }
        return Ok(());
    }

    let summary = csv_import::import_csv(state.store.as_ref(), state.key_matching, &text, |p| {
        eprint!("\r{}/{} ({:.0}%)", p.processed, p.total, p.fraction() * 100.0);
        std::io::stderr().flush().ok();
    })
    .await?;
    eprintln!();

    if json {
        print_json(&summary)?;
    } else {
        println!("{}", summary.message());
    }
    Ok(())
}

async fn handle_export(state: &AppState, output: Option<PathBuf>) -> Result<()> {
    let listing = source::load_items(state.store.as_ref(), state.csv.as_ref(), false).await?;
    let body = csv_import::export_csv(&listing.items)?;
    let path = output.unwrap_or_else(|| {
        PathBuf::from(csv_import::export_file_name(chrono::Local::now().date_naive()))
    });
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Exported {} items to {}", listing.items.len(), path.display());
    Ok(())
}

async fn handle_sync(state: &AppState, action: &str, json: bool) -> Result<()> {
    let action: SyncAction = action.parse()?;
    let sheets = state
        .sheets
        .as_deref()
        .ok_or_else(|| anyhow!("Google Service Account credentials not found"))?;

    let report = SyncOrchestrator::new(state.store.as_ref(), sheets, state.key_matching)
        .run(action)
        .await?;
    if json {
        print_json(&report)?;
    } else {
        println!("{}", report.message);
    }
    Ok(())
}

async fn handle_items(
    state: &AppState,
    fallback: bool,
    filter: ViewFilter,
    best: Option<String>,
    json: bool,
) -> Result<()> {
    let listing = source::load_items(state.store.as_ref(), state.csv.as_ref(), fallback).await?;
    if listing.using_fallback {
        eprintln!("Using CSV fallback");
    }
    let view = LocalItemView::new(listing.items);

    let items: Vec<_> = match best {
        Some(name) => view.best_match(&name).into_iter().collect(),
        None => view.filter(&filter),
    };

    if json {
        return print_json(&items);
    }
    for item in &items {
        println!("{}\t{}\t{}", item.name, item.category, item.default_supplier);
    }
    println!(
        "{} of {} items ({} categories, {} suppliers)",
        items.len(),
        view.len(),
        view.categories().len(),
        view.suppliers().len()
    );
    Ok(())
}

fn handle_secret_command(command: SecretCommands) -> Result<()> {
    let key_for = |name: &str| {
        storage::key_for_name(name).ok_or_else(|| {
            anyhow!("unknown secret '{name}' (expected supabase-key or google-credentials)")
        })
    };

    match command {
        SecretCommands::Set { name, value } => {
            let key = key_for(&name)?;
            let value = match value {
                Some(v) => v,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            if value.trim().is_empty() {
                bail!("secret value is empty");
            }
            storage::set_credential(key, value.trim()).map_err(|e| anyhow!(e))?;
            println!("Stored {name}");
        }
        SecretCommands::Delete { name } => {
            storage::delete_credential(key_for(&name)?).map_err(|e| anyhow!(e))?;
            println!("Deleted {name}");
        }
        SecretCommands::Clear => {
            storage::clear_all().map_err(|e| anyhow!(e))?;
            println!("All secrets cleared");
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
