use catweight_ledger_lib::{
    apply_embedded_migrations, dashboard_query, import_export_at_db_path, init_tracing,
    inspect_status_at_path, preview_export_at_path, save_weight_command, series_query,
    DashboardQueryRequest, LedgerConfig, LedgerError, LedgerResult, SaveWeightRequest,
    SeriesQueryRequest, SheetImportRequest, SheetPreviewRequest,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "catweight", about = "Cat weight ledger", version)]
struct Cli {
    /// Ledger database; overrides CATWEIGHT_DB_PATH.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Text of the header row's date cell; overrides CATWEIGHT_HEADER.
    #[arg(long, global = true)]
    header: Option<String>,
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending ledger migrations.
    Migrate,
    /// Show migration status and row count.
    Status,
    /// Record one weight (DD/MM/YYYY or YYYY-MM-DD).
    Save {
        date: String,
        cat: String,
        weight: String,
    },
    Dashboard(DashboardArgs),
    Series(SeriesArgs),
    /// Read a .csv/.xlsx/.json export without writing.
    Preview { file: String },
    /// Upsert every value of an export into the ledger.
    Import { file: String },
}

#[derive(Args, Debug)]
struct DashboardArgs {
    /// 1m, 3m, 6m, 1y or all.
    #[arg(long, default_value = "all")]
    range: String,
    #[arg(long, value_delimiter = ',')]
    cats: Option<Vec<String>>,
    /// YYYY-MM-DD standing in for the current date.
    #[arg(long)]
    today: Option<String>,
}

#[derive(Args, Debug)]
struct SeriesArgs {
    #[arg(long, default_value = "all")]
    range: String,
    #[arg(long)]
    today: Option<String>,
}

fn to_json<T: serde::Serialize>(value: T) -> LedgerResult<Value> {
    serde_json::to_value(value).map_err(|e| LedgerError::StoreIo(format!("serialize output: {e}")))
}

fn run(cli: Cli) -> LedgerResult<Value> {
    let mut config = LedgerConfig::from_env()?;
    if let Some(db_path) = cli.db {
        config.db_path = db_path;
    }
    if let Some(header) = cli.header {
        config.header_sentinel = header;
    }

    match cli.command {
        Commands::Migrate => to_json(apply_embedded_migrations(&config.db_path)?),
        Commands::Status => to_json(inspect_status_at_path(&config.db_path)?),
        Commands::Save { date, cat, weight } => {
            let req = SaveWeightRequest {
                date: Some(date),
                cat: Some(cat),
                weight: Some(Value::String(weight)),
            };
            to_json(save_weight_command(&config, &req)?)
        }
        Commands::Dashboard(args) => dashboard_query(
            &config,
            &DashboardQueryRequest {
                range: Some(args.range),
                cats: args.cats,
                today: args.today,
            },
        ),
        Commands::Series(args) => series_query(
            &config,
            &SeriesQueryRequest {
                range: Some(args.range),
                today: args.today,
            },
        ),
        Commands::Preview { file } => preview_export_at_path(&SheetPreviewRequest {
            source_path: Some(file),
            header_sentinel: Some(config.header_sentinel.clone()),
        }),
        Commands::Import { file } => import_export_at_db_path(
            &config.db_path,
            &SheetImportRequest {
                source_path: Some(file),
                header_sentinel: Some(config.header_sentinel.clone()),
            },
        ),
    }
}

fn print_json(value: &Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .unwrap_or_else(|e| format!("{{\"error\":\"serialize output failed: {e}\"}}"));
    println!("{text}");
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let pretty = cli.pretty;

    match run(cli) {
        Ok(payload) => {
            let failed = payload.get("success").and_then(Value::as_bool) == Some(false);
            print_json(&payload, pretty);
            if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            print_json(
                &json!({ "category": err.kind(), "message": err.to_string() }),
                pretty,
            );
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_accept_equals_form_after_the_subcommand() {
        let cli = Cli::try_parse_from(["catweight", "save", "05/01/2025", "Maite", "4,2", "--db=/tmp/x.db"])
            .expect("parse save");
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::Save { date, cat, weight } => {
                assert_eq!((date.as_str(), cat.as_str(), weight.as_str()), ("05/01/2025", "Maite", "4,2"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn dashboard_cats_split_on_commas() {
        let cli = Cli::try_parse_from(["catweight", "dashboard", "--range", "3m", "--cats", "Maite,Benito"])
            .expect("parse dashboard");
        match cli.command {
            Commands::Dashboard(args) => {
                assert_eq!(args.range, "3m");
                assert_eq!(args.cats, Some(vec!["Maite".to_string(), "Benito".to_string()]));
                assert_eq!(args.today, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_flag_value_is_a_usage_error() {
        assert!(Cli::try_parse_from(["catweight", "series", "--range"]).is_err());
        assert!(Cli::try_parse_from(["catweight", "weigh"]).is_err());
    }
}
