use std::path::PathBuf;

use atty::Stream;
use clap::{value_parser, ArgAction, Args, Parser, Subcommand};
use color_eyre::Result;
use serde_json::Value;

mod commands;
mod config;
mod outcome;
mod style;

use config::{BuildConfig, EnvSnapshot};
use outcome::{CommandStatus, ExecutionOutcome};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = CqdbCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let name = cli.command.name();
    let outcome = match execute(&cli.command) {
        Ok(outcome) => outcome,
        Err(err) => ExecutionOutcome::failure(
            format!("{err:#}"),
            serde_json::json!({ "reason": err.to_string() }),
        ),
    };
    let code = emit_output(&cli, name, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("cqdb={level},cqdb_core={level},cqdb_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn execute(command: &CommandCli) -> anyhow::Result<ExecutionOutcome> {
    match command {
        CommandCli::Build(args) => {
            let config = BuildConfig::resolve(&EnvSnapshot::capture(), args.one_way, args.intern);
            commands::build(&args.input, &args.output, config)
        }
        CommandCli::Lookup(args) => commands::lookup(&args.db, &args.keys),
        CommandCli::Reverse(args) => commands::reverse(&args.db, &args.ids),
        CommandCli::Stat(args) => commands::stat(&args.db),
        CommandCli::Dump(args) => commands::dump(&args.db),
    }
}

fn emit_output(cli: &CqdbCli, name: &str, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));

    if cli.json {
        let payload = outcome::to_json_response(name, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if outcome.status == CommandStatus::Failure {
        let message = outcome::format_status_message(name, &outcome.message);
        eprintln!("{}", style.status(&outcome.status, &message));
    } else if !cli.quiet {
        if is_passthrough(&outcome.details) {
            if !outcome.message.is_empty() {
                println!("{}", outcome.message);
            }
        } else {
            let message = outcome::format_status_message(name, &outcome.message);
            println!("{}", style.status(&outcome.status, &message));
            if let Some(hint) = hint_from_details(&outcome.details) {
                let hint_line = format!("Hint: {hint}");
                println!("{}", style.info(&hint_line));
            }
            if name == "stat" {
                println!("{}", render_stat_table(&style, &outcome.details));
            }
        }
    }

    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn render_stat_table(style: &Style, details: &Value) -> String {
    let rows = [
        ("size", "Chunk bytes"),
        ("records", "Records"),
        ("backlinks", "Backlinks"),
        ("buckets_used", "Buckets used"),
        ("slots", "Slots"),
        ("largest_bucket", "Largest bucket"),
        ("one_way", "One-way"),
    ];
    let width = rows.iter().map(|(_, label)| label.len()).max().unwrap_or(0);
    let mut lines = vec![style.table_header(&format!("{:<width$}  Value", "Field"))];
    lines.push(format!("{:-<width$}  {:-<5}", "", ""));
    for (key, label) in rows {
        let value = details.get(key).map(ToString::to_string).unwrap_or_default();
        lines.push(format!("{label:<width$}  {value}"));
    }
    lines.join("\n")
}

#[derive(Parser, Debug)]
#[command(
    name = "cqdb",
    version,
    about = "Build and query constant quark databases (immutable string/id dictionaries)."
)]
struct CqdbCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)"
    )]
    quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vvv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q")]
    trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes")]
    json: bool,
    #[arg(long, help = "Disable colored human output")]
    no_color: bool,
    #[command(subcommand)]
    command: CommandCli,
}

#[derive(Subcommand, Debug)]
enum CommandCli {
    #[command(
        about = "Build a chunk from `key<TAB>id` lines (or plain lines with --intern).",
        override_usage = "cqdb build <INPUT> <OUTPUT> [--one-way] [--intern]",
        after_help = "Examples:\n  cqdb build labels.tsv labels.cqdb\n  cqdb build words.txt words.cqdb --intern --one-way\n"
    )]
    Build(BuildArgs),
    #[command(about = "Look up the id stored for each key.")]
    Lookup(LookupArgs),
    #[command(about = "Look up the key stored for each id.")]
    Reverse(ReverseArgs),
    #[command(about = "Show header and bucket statistics for a chunk.")]
    Stat(DbArgs),
    #[command(about = "Print every record as `id<TAB>key`, sorted by id.")]
    Dump(DbArgs),
}

impl CommandCli {
    fn name(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Lookup(_) => "lookup",
            Self::Reverse(_) => "reverse",
            Self::Stat(_) => "stat",
            Self::Dump(_) => "dump",
        }
    }
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[arg(value_parser = value_parser!(PathBuf))]
    input: PathBuf,
    #[arg(value_parser = value_parser!(PathBuf))]
    output: PathBuf,
    #[arg(long, help = "Omit the reverse (id -> key) index")]
    one_way: bool,
    #[arg(long, help = "Treat each line as a key and number distinct keys from 0")]
    intern: bool,
}

#[derive(Args, Debug)]
struct LookupArgs {
    #[arg(value_parser = value_parser!(PathBuf))]
    db: PathBuf,
    #[arg(required = true)]
    keys: Vec<String>,
}

#[derive(Args, Debug)]
struct ReverseArgs {
    #[arg(value_parser = value_parser!(PathBuf))]
    db: PathBuf,
    #[arg(required = true, allow_negative_numbers = true)]
    ids: Vec<i32>,
}

#[derive(Args, Debug)]
struct DbArgs {
    #[arg(value_parser = value_parser!(PathBuf))]
    db: PathBuf,
}
