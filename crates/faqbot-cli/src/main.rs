use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use faqbot_api::allowed_file;
use faqbot_core::{ChatQuery, FaqTable, Rule, FALLBACK_ANSWER};
use faqbot_store_xlsx::{workbook, FaqStore};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "faqbot")]
#[command(about = "FAQ chatbot CLI")]
struct Cli {
    #[arg(long, default_value = "./faq.xlsx")]
    faq: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer one question against the FAQ workbook.
    Ask(AskArgs),
    /// Summarize the rules in the FAQ workbook.
    Inspect(InspectArgs),
    /// Move a workbook over the FAQ file and reload it.
    Replace(ReplaceArgs),
    /// Write the current rules to a new workbook.
    Export(ExportArgs),
    /// Create a starter FAQ workbook.
    Init(InitArgs),
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    role: String,
    #[arg(long)]
    message: String,
    #[arg(long, default_value_t = false)]
    explain: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Fail on an unreadable workbook instead of reporting zero rows.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Debug, Args)]
struct ReplaceArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    // stdout carries the JSON result, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Ask(args) => run_ask(&cli.faq, &args),
        Command::Inspect(args) => run_inspect(&cli.faq, &args),
        Command::Replace(args) => run_replace(&cli.faq, &args),
        Command::Export(args) => run_export(&cli.faq, &args),
        Command::Init(args) => run_init(&cli.faq, &args),
    }
}

fn run_ask(faq: &Path, args: &AskArgs) -> Result<()> {
    let query = ChatQuery::new(&args.role, &args.message)?;
    let table = faqbot_store_xlsx::load(faq);

    let mut value = serde_json::json!({ "answer": table.answer_for(&query) });
    if args.explain {
        let found = table.find_match(query.role(), query.message());
        value["matched"] = match found {
            Some(found) => serde_json::json!({
                "row": found.row,
                "sheet_row": found.sheet_row,
                "role": found.rule.role(),
                "keyword": found.keyword,
            }),
            None => Value::Null,
        };
        let fallback = value["answer"] == FALLBACK_ANSWER;
        value["fallback"] = Value::Bool(fallback);
    }
    emit_json(value)
}

fn run_inspect(faq: &Path, args: &InspectArgs) -> Result<()> {
    let table = if args.strict {
        faqbot_store_xlsx::try_load(faq)
            .with_context(|| format!("failed to load {}", faq.display()))?
    } else {
        faqbot_store_xlsx::load(faq)
    };
    let summary = table.summary();
    emit_json(serde_json::json!({
        "faq_path": faq.display().to_string(),
        "rows": summary.rows,
        "roles": summary.roles,
    }))
}

fn run_replace(faq: &Path, args: &ReplaceArgs) -> Result<()> {
    let name = args.file.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    if !allowed_file(name) {
        return Err(anyhow!("Only Excel files (.xlsx/.xls) are allowed: {}", args.file.display()));
    }
    let store = FaqStore::open(faq);
    let previous_rows = store.snapshot().len();
    let table = store.replace(&args.file)?;
    emit_json(serde_json::json!({
        "faq_path": faq.display().to_string(),
        "previous_rows": previous_rows,
        "rows": table.len(),
    }))
}

fn run_export(faq: &Path, args: &ExportArgs) -> Result<()> {
    let table = faqbot_store_xlsx::load(faq);
    let rows = workbook::write_table(&args.out, &table)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    emit_json(serde_json::json!({
        "out": args.out.display().to_string(),
        "rows": rows,
    }))
}

fn run_init(faq: &Path, args: &InitArgs) -> Result<()> {
    if faq.exists() && !args.force {
        return Err(anyhow!("{} already exists; pass --force to overwrite", faq.display()));
    }
    let table = starter_table();
    let rows = workbook::write_table(faq, &table)
        .with_context(|| format!("failed to write {}", faq.display()))?;
    emit_json(serde_json::json!({
        "faq_path": faq.display().to_string(),
        "rows": rows,
    }))
}

fn starter_table() -> FaqTable {
    FaqTable::new(vec![
        Rule::new(
            "common",
            "hello, good morning",
            "Hello! Ask me about fees, timings or admissions.",
        ),
        Rule::new("parent", "fee, fees", "Fees are due by the 10th of every month."),
        Rule::new("student", "timing, timings", "School runs from 8:00 AM to 2:30 PM."),
    ])
}
