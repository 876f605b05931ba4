use anyhow::{Result, bail};
use tokio::sync::mpsc;

use super::{BatchArgs, ProcessArgs, ProcessInput};
use crate::core::batch::{BatchProgress, BatchReport};
use crate::core::config::AppConfig;
use crate::core::dataset::Dataset;
use crate::core::pipeline::ProcessOptions;
use crate::core::service::{BatchRequest, ProcessingService};
use crate::core::terminal::{self, GuideSection};
use crate::logging;

async fn build_service(config: &AppConfig) -> Result<ProcessingService> {
    config.validate()?;
    logging::init_tracing(&config.logging.level, false);
    ProcessingService::from_config(config).await
}

pub(super) async fn run_process(config: AppConfig, args: ProcessArgs) -> Result<()> {
    let service = build_service(&config).await?;
    let options = ProcessOptions {
        schedule_offset_days: args.schedule_days,
        attach_latest_asset: args.attach_asset,
    };
    let reference = match &args.input {
        ProcessInput::Content(text) => service.process_one(text, &options).await?,
        ProcessInput::Index(index) => service.process_index(*index, &options).await?,
    };
    terminal::print_success("Published");
    terminal::print_status("Page", &reference.page_id);
    terminal::print_link("URL", &reference.url);
    Ok(())
}

fn print_report(report: &BatchReport) {
    let mut section = GuideSection::new("Batch report")
        .status("Status", &format!("{:?}", report.status))
        .status(
            "Processed",
            &format!("{}/{}", report.processed, report.total),
        )
        .status("Succeeded", &report.succeeded.to_string())
        .status("Failed", &report.failed.to_string())
        .status("Skipped", &report.skipped.to_string())
        .status("Success rate", &format!("{:.1}%", report.success_rate));
    for item in &report.items {
        let line = match (&item.published_reference, &item.terminal_error) {
            (Some(reference), _) => format!(
                "#{} ok after {} attempt(s): {}",
                item.index, item.attempts_made, reference.url
            ),
            (None, Some(error)) => format!(
                "#{} failed after {} attempt(s): {}",
                item.index, item.attempts_made, error
            ),
            (None, None) => format!("#{} failed", item.index),
        };
        section = section.text(&line);
    }
    section.print();
    for skipped in &report.skipped_items {
        terminal::print_skipped(skipped.index, &skipped.reason);
    }
    println!();
}

pub(super) async fn run_batch(config: AppConfig, args: BatchArgs) -> Result<()> {
    let service = build_service(&config).await?;
    let request = BatchRequest {
        contents: None,
        start_index: args.start,
        count: args.count,
        max_retries: args.max_retries,
        fail_fast: args.no_fail_fast.then_some(false),
        schedule_days: args.schedule_days,
        attach_asset: false,
    };

    let (tx, mut rx) = mpsc::channel::<BatchProgress>(32);
    let printer = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            terminal::print_info(&format!(
                "[{}/{}] item #{} done (succeeded {}, failed {})",
                p.position, p.total, p.index, p.succeeded, p.failed
            ));
        }
    });
    let outcome = service.run_batch_request(&request, Some(tx)).await?;
    let _ = printer.await;

    match outcome {
        Ok(report) => {
            print_report(&report);
            if report.failed > 0 {
                terminal::print_warn(&format!(
                    "Batch completed with {} failed item(s)",
                    report.failed
                ));
            } else {
                terminal::print_success("Batch completed");
            }
            Ok(())
        }
        Err(abort) => {
            print_report(&abort.report);
            bail!(
                "batch stopped at item #{}: {}",
                abort.triggered_at_index,
                abort.cause
            )
        }
    }
}

pub(super) async fn run_dataset_count(config: AppConfig) -> Result<()> {
    let dataset = Dataset::load(&config.dataset.path).await?;
    terminal::print_status(
        "Entries",
        &format!("{} in {}", dataset.count(), config.dataset.path.display()),
    );
    Ok(())
}
