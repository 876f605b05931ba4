mod processing;
mod serve;

use anyhow::{Context, Result, bail};
use console::style;
use std::path::PathBuf;

use crate::core::config::AppConfig;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Server")
        .command("serve", "Start the HTTP API")
        .text("--host <addr>  --port <n>")
        .print();

    GuideSection::new("Processing")
        .command("process", "Process one text and publish it")
        .text("--content <text> | --index <n>  [--schedule-days <n>] [--attach-asset]")
        .command("batch", "Process a slice of the dataset")
        .text("--start <n> --count <n>  [--max-retries <n>] [--no-fail-fast] [--schedule-days <n>]")
        .print();

    GuideSection::new("Dataset")
        .command("dataset count", "Number of usable entries")
        .print();

    GuideSection::new("Options")
        .text("--config <path>   Config file (default: $HALAKHA_CONFIG, then the user config dir)")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("halakha-pipeline").green()
    );
}

/// Value following `name`, if the flag is present.
fn flag_value<'a>(args: &'a [String], start: usize, name: &str) -> Result<Option<&'a str>> {
    let mut i = start;
    while i < args.len() {
        if args[i] == name {
            return match args.get(i + 1) {
                Some(v) => Ok(Some(v.as_str())),
                None => bail!("{} expects a value", name),
            };
        }
        i += 1;
    }
    Ok(None)
}

fn has_flag(args: &[String], start: usize, name: &str) -> bool {
    args.iter().skip(start).any(|a| a == name)
}

fn parse_flag<T>(args: &[String], start: usize, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match flag_value(args, start, name)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} `{}`: {}", name, raw, e)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub(crate) fn parse_serve_args(args: &[String], start: usize) -> Result<ServeArgs> {
    Ok(ServeArgs {
        host: flag_value(args, start, "--host")?.map(str::to_string),
        port: parse_flag(args, start, "--port")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProcessInput {
    Content(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessArgs {
    pub input: ProcessInput,
    pub schedule_days: i64,
    pub attach_asset: bool,
}

pub(crate) fn parse_process_args(args: &[String], start: usize) -> Result<ProcessArgs> {
    let content = flag_value(args, start, "--content")?;
    let index: Option<usize> = parse_flag(args, start, "--index")?;
    let input = match (content, index) {
        (Some(text), None) => ProcessInput::Content(text.to_string()),
        (None, Some(i)) => ProcessInput::Index(i),
        (Some(_), Some(_)) => bail!("pass either --content or --index, not both"),
        (None, None) => bail!("--content or --index is required"),
    };
    Ok(ProcessArgs {
        input,
        schedule_days: parse_flag(args, start, "--schedule-days")?.unwrap_or(0),
        attach_asset: has_flag(args, start, "--attach-asset"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BatchArgs {
    pub start: usize,
    pub count: usize,
    pub max_retries: Option<u32>,
    pub no_fail_fast: bool,
    pub schedule_days: i64,
}

pub(crate) fn parse_batch_args(args: &[String], start: usize) -> Result<BatchArgs> {
    let count = parse_flag(args, start, "--count")?.context("--count is required")?;
    Ok(BatchArgs {
        start: parse_flag(args, start, "--start")?.unwrap_or(0),
        count,
        max_retries: parse_flag(args, start, "--max-retries")?,
        no_fail_fast: has_flag(args, start, "--no-fail-fast"),
        schedule_days: parse_flag(args, start, "--schedule-days")?.unwrap_or(0),
    })
}

async fn load_config(args: &[String]) -> Result<AppConfig> {
    let explicit = flag_value(args, 1, "--config")?.map(PathBuf::from);
    AppConfig::load(explicit.as_deref()).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => {
            let parsed = parse_serve_args(&args, 2)?;
            let config = load_config(&args).await?;
            serve::run_serve(config, parsed).await
        }
        "process" => {
            let parsed = parse_process_args(&args, 2)?;
            let config = load_config(&args).await?;
            processing::run_process(config, parsed).await
        }
        "batch" => {
            let parsed = parse_batch_args(&args, 2)?;
            let config = load_config(&args).await?;
            processing::run_batch(config, parsed).await
        }
        "dataset" => match args.get(2).map(String::as_str) {
            Some("count") => {
                let config = load_config(&args).await?;
                processing::run_dataset_count(config).await
            }
            _ => {
                GuideSection::new("halakha-pipeline dataset")
                    .command("count", "Number of usable entries")
                    .print();
                println!();
                Ok(())
            }
        },
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
