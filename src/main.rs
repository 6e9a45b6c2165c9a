use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use clap::{Parser, Subcommand};
use procure_sheets::config::Settings;
use procure_sheets::io::excel_write;
use procure_sheets::io::smartsheet::SmartsheetClient;
use procure_sheets::mapping::{ITEM_KEY, TargetSchema};
use procure_sheets::model::Key;
use procure_sheets::reconcile::InsertPlan;
use procure_sheets::sync::{
    self, DeleteOutcome, DeleteRequest, ImportOutcome, TableRequest, UpdateOutcome,
};
use procure_sheets::{ErrorKind, Result, ToolError};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit code used when an import is blocked by existing keys.
const EXIT_DUPLICATES: i32 = 6;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging(&cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }

    let started = Instant::now();
    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(%error, "command failed");
            eprintln!("error: {error}");
            exit_code(error.kind())
        }
    };
    info!(elapsed = ?started.elapsed(), "finished");
    std::process::exit(code);
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Configuration => 2,
        ErrorKind::SourceRead => 3,
        ErrorKind::RemoteLookup => 4,
        ErrorKind::RemoteTransport => 5,
        ErrorKind::Internal => 1,
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|err| ToolError::Logging(err.to_string()))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|err| ToolError::Logging(err.to_string()))
}

fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::load(cli.env_file.as_deref())?;
    let gateway = SmartsheetClient::from_settings(&settings)?;

    match cli.command {
        Command::Create { name } => {
            let sheet = sync::create_sheet(&gateway, &settings, &name)?;
            println!("Created sheet '{}' (id {}).", sheet.name, sheet.id);
            Ok(0)
        }
        Command::List => {
            for sheet in sync::list_sheets(&gateway, &settings)? {
                println!("{}\t{}", sheet.name, sheet.id);
            }
            Ok(0)
        }
        Command::Import(args) => {
            let request = args.table.request(&settings, TargetSchema::import)?;
            execute_import(&gateway, &settings, &request, &args)
        }
        Command::Update(args) => {
            let request = args.table.request(&settings, TargetSchema::update)?;
            execute_update(&gateway, &settings, &request, &args)
        }
        Command::Delete(args) => {
            let request = DeleteRequest {
                sheet_name: args.sheet,
                key_field: args.key_field,
                keys: args.keys,
            };
            match sync::delete_rows(&gateway, &settings, &request)? {
                DeleteOutcome::Deleted { rows, missing } => {
                    println!("Deleted {rows} row(s).");
                    report_missing(&missing);
                }
                DeleteOutcome::NothingToDelete { missing } => {
                    println!("No matching rows; nothing deleted.");
                    report_missing(&missing);
                }
            }
            Ok(0)
        }
    }
}

fn execute_import(
    gateway: &SmartsheetClient,
    settings: &Settings,
    request: &TableRequest,
    args: &ImportArgs,
) -> Result<i32> {
    let prepared = sync::prepare_import(gateway, settings, request, args.allow_duplicates)?;
    if let Some(path) = &args.table.report {
        excel_write::write_insert_report(path, &prepared.fields, &prepared.plan)?;
        println!("Plan written to {}.", path.display());
    }
    if args.table.dry_run {
        println!("Dry run: {}", describe_insert(&prepared.plan));
        return Ok(0);
    }

    match sync::apply_import(gateway, &prepared)? {
        ImportOutcome::Inserted { rows, tagged } => {
            println!(
                "Data inserted successfully: {rows} row(s) added to '{}'.",
                prepared.target.sheet.name
            );
            if !tagged.is_empty() {
                println!("Tagged as duplicates: {}", join_keys(&tagged));
            }
            Ok(0)
        }
        ImportOutcome::DuplicatesFound { keys } => {
            println!(
                "Duplicates found; nothing was imported. Existing item(s): {}",
                join_keys(&keys)
            );
            println!("Re-run with --allow-duplicates to insert them tagged as duplicates.");
            Ok(EXIT_DUPLICATES)
        }
    }
}

fn execute_update(
    gateway: &SmartsheetClient,
    settings: &Settings,
    request: &TableRequest,
    args: &UpdateArgs,
) -> Result<i32> {
    let prepared = sync::prepare_update(gateway, settings, request)?;
    if let Some(path) = &args.table.report {
        excel_write::write_update_report(path, &prepared.plan)?;
        println!("Plan written to {}.", path.display());
    }
    if args.table.dry_run {
        println!(
            "Dry run: {} row(s), {} cell(s) would change.",
            prepared.plan.patches().len(),
            prepared.plan.cell_count()
        );
        return Ok(0);
    }

    match sync::apply_update(gateway, &prepared)? {
        UpdateOutcome::Updated {
            rows,
            cells,
            unmatched,
        } => {
            println!(
                "Updated {cells} cell(s) across {rows} row(s) in '{}'.",
                prepared.target.sheet.name
            );
            report_unmatched(&unmatched);
        }
        UpdateOutcome::NoDifferences { unmatched } => {
            println!("No differences found; the sheet is already up to date.");
            report_unmatched(&unmatched);
        }
    }
    Ok(0)
}

fn describe_insert(plan: &InsertPlan) -> String {
    match plan {
        InsertPlan::Insert { rows, tagged } if tagged.is_empty() => {
            format!("{} row(s) would be added.", rows.len())
        }
        InsertPlan::Insert { rows, tagged } => format!(
            "{} row(s) would be added, {} tagged as duplicates.",
            rows.len(),
            tagged.len()
        ),
        InsertPlan::DuplicatesFound { keys } => {
            format!("blocked by existing item(s): {}", join_keys(keys))
        }
    }
}

fn report_unmatched(unmatched: &BTreeSet<Key>) {
    if !unmatched.is_empty() {
        println!(
            "Skipped {} item(s) not present in the sheet: {}",
            unmatched.len(),
            join_keys(unmatched)
        );
    }
}

fn report_missing(missing: &[String]) {
    if !missing.is_empty() {
        println!("Not found: {}", missing.join(", "));
    }
}

fn join_keys(keys: &BTreeSet<Key>) -> String {
    keys.iter()
        .map(Key::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Create purchasing sheets from a template and keep them in step with Excel workbooks."
)]
struct Cli {
    /// Environment file holding the settings (defaults to ./.env when present).
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Append log output to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new sheet in the workspace from the template.
    Create {
        /// Name of the new sheet.
        name: String,
    },
    /// List the sheets in the workspace.
    List,
    /// Add workbook rows to an existing sheet.
    Import(ImportArgs),
    /// Update an existing sheet with the values from a workbook.
    Update(UpdateArgs),
    /// Delete rows from a sheet by key.
    Delete(DeleteArgs),
}

#[derive(clap::Args)]
struct TableArgs {
    /// Workbook to read. Bare names are looked up in EXCEL_FOLDER.
    #[arg(long)]
    file: PathBuf,

    /// Name of the destination sheet.
    #[arg(long)]
    sheet: String,

    /// Workbook tab to read (defaults to EXCEL_TAB).
    #[arg(long)]
    tab: Option<String>,

    /// Text of the cell above the table header (defaults to TABLE_NAME).
    #[arg(long)]
    marker: Option<String>,

    /// JSON file describing the column mapping.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Plan the changes without writing them.
    #[arg(long)]
    dry_run: bool,

    /// Write the planned changes to an Excel workbook.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl TableArgs {
    fn request(
        &self,
        settings: &Settings,
        default_schema: fn() -> TargetSchema,
    ) -> Result<TableRequest> {
        let schema = match &self.schema {
            Some(path) => TargetSchema::from_path(path)?,
            None => default_schema(),
        };
        Ok(TableRequest::new(
            settings,
            &self.file,
            self.tab.clone(),
            self.marker.clone(),
            self.sheet.clone(),
            schema,
        ))
    }
}

#[derive(clap::Args)]
struct ImportArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Insert rows whose item already exists, tagging their key as a duplicate.
    #[arg(long)]
    allow_duplicates: bool,
}

#[derive(clap::Args)]
struct UpdateArgs {
    #[command(flatten)]
    table: TableArgs,
}

#[derive(clap::Args)]
struct DeleteArgs {
    /// Name of the sheet to delete rows from.
    #[arg(long)]
    sheet: String,

    /// Column holding the keys.
    #[arg(long, default_value = ITEM_KEY)]
    key_field: String,

    /// Key of a row to delete. Repeat for several rows.
    #[arg(long = "key", required = true)]
    keys: Vec<String>,
}
