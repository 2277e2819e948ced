use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use datachat::executor::ResultData;
use datachat::ingest;
use datachat::sample_data::{self, SampleKind};
use datachat::{EngineConfig, Response, Session, TableSchema};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ask questions about a CSV or JSON table in plain English
#[derive(Parser, Debug)]
#[command(name = "datachat")]
#[command(version, about, long_about = None)]
struct Args {
    /// Language model API key (or set OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the inferred schema of a table
    Schema {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Answer one question
    Ask {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// The question, e.g. "what is the average age"
        question: String,
    },
    /// Answer questions read line by line from stdin
    Repl {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Write a synthetic sample table
    Sample {
        #[arg(long, default_value = "100")]
        rows: usize,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, default_value_t = sample_data::DEFAULT_SEED)]
        seed: u64,
        #[arg(long, value_enum, default_value = "employees")]
        kind: SampleArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SampleArg {
    Employees,
    Sales,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env()?.with_api_key(args.api_key);

    match args.command {
        Command::Schema { file, format } => {
            let session = load_session(config, &file)?;
            if let Some(schema) = session.schema() {
                print_schema(schema, format)?;
            }
        }
        Command::Ask { file, format, question } => {
            let session = load_session(config, &file)?;
            match session.ask(&question).await {
                Ok(response) => print_response(&response, format)?,
                Err(e) => anyhow::bail!(e.user_message()),
            }
        }
        Command::Repl { file } => {
            let session = load_session(config, &file)?;
            println!("Loaded {}. Ask a question, or 'quit' to exit.", file.display());
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                if matches!(question, "quit" | "exit") {
                    break;
                }
                match session.ask(question).await {
                    Ok(response) => print_response(&response, OutputFormat::Text)?,
                    Err(e) => println!("{}", e.user_message()),
                }
            }
        }
        Command::Sample { rows, out, seed, kind } => {
            let kind = match kind {
                SampleArg::Employees => SampleKind::Employees,
                SampleArg::Sales => SampleKind::Sales,
            };
            sample_data::write_sample(kind, rows, seed, &out)?;
            println!("Wrote {} rows to {}", rows, out.display());
        }
    }

    Ok(())
}

fn load_session(config: EngineConfig, file: &Path) -> Result<Session> {
    let table = ingest::load_path(file).with_context(|| format!("Failed to load {}", file.display()))?;
    let mut session = Session::new(config)?;
    if let Err(e) = session.upload(table) {
        anyhow::bail!(e.user_message());
    }
    info!("Interpreting questions with the '{}' interpreter", session.interpreter_name());
    Ok(session)
}

fn print_schema(schema: &TableSchema, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(schema)?),
        OutputFormat::Text | OutputFormat::Csv => {
            println!("{} rows, {} columns", schema.row_count, schema.columns.len());
            for column in &schema.columns {
                println!(
                    "  {:<24} {:<12} nulls={:<4} distinct={:<4} e.g. {}",
                    column.normalized_name,
                    column.inferred_type,
                    column.null_count,
                    column.distinct_count,
                    column.sample_values.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn print_response(response: &Response, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Csv => write_csv(&response.result.data)?,
        OutputFormat::Text => {
            println!("{}", response.text);
            match &response.result.data {
                ResultData::Scalar { value } => println!("{}", value),
                ResultData::Table { columns, rows } => {
                    println!("{}", columns.join("\t"));
                    for row in rows {
                        println!("{}", row.iter().join("\t"));
                    }
                }
                ResultData::CorrelationMatrix { columns, values } => {
                    println!("\t{}", columns.join("\t"));
                    for (name, row) in columns.iter().zip(values) {
                        let cells = row
                            .iter()
                            .map(|v| v.map(|r| format!("{:.3}", r)).unwrap_or_else(|| "-".to_string()))
                            .join("\t");
                        println!("{}\t{}", name, cells);
                    }
                }
            }
            if let Some(chart) = &response.chart {
                println!(
                    "Chart: {} (x: {}, y: {})",
                    chart.kind.as_str(),
                    chart.x.as_deref().unwrap_or("-"),
                    chart.y.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn write_csv(data: &ResultData) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    match data {
        ResultData::Scalar { value } => {
            writer.write_record(["value"])?;
            writer.write_record([value.to_string()])?;
        }
        ResultData::Table { columns, rows } => {
            writer.write_record(columns)?;
            for row in rows {
                writer.write_record(row.iter().map(|v| v.to_string()))?;
            }
        }
        ResultData::CorrelationMatrix { columns, values } => {
            writer.write_record(std::iter::once("column").chain(columns.iter().map(|c| c.as_str())))?;
            for (name, row) in columns.iter().zip(values) {
                let cells = row.iter().map(|v| v.map(|r| r.to_string()).unwrap_or_default());
                writer.write_record(std::iter::once(name.clone()).chain(cells))?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
