use std::io::{self, Write};

use serde::Serialize;

use crate::archive::{PlanReport, ProgressEvent, ProgressSink, RunReport};
use crate::domain::format_bytes;
use crate::state::ProgressState;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_plan(result: &PlanReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_state(state: &ProgressState) -> io::Result<()> {
        Self::print_json(state)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Streams phase messages to stderr as they happen.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

pub fn print_run_summary(report: &RunReport) {
    if report.dry_run {
        println!("dry run: no files were written, no state was saved");
    }
    println!(
        "archived {} item(s), {}",
        report.archived_items,
        format_bytes(report.transferred_bytes)
    );
    if report.skipped_items > 0 {
        println!("skipped {} already-archived item(s)", report.skipped_items);
    }
    if report.oversized_items > 0 {
        println!(
            "{} item(s) exceeded chunk capacity and overflow their chunk",
            report.oversized_items
        );
    }
    println!(
        "current chunk: {} ({} occupied)",
        report.final_chunk_index,
        format_bytes(report.final_chunk_occupied_bytes)
    );
}

pub fn print_plan_table(report: &PlanReport) {
    println!(
        "{:<7} | {:<25} | {:<10} | {:<6}",
        "Chunk", "Date range", "Size", "Items"
    );
    println!("{}", "-".repeat(57));
    for chunk in &report.chunks {
        println!(
            "{:<7} | {} to {:<11} | {:<10} | {:<6}",
            chunk.index,
            chunk.first_date,
            chunk.last_date,
            format_bytes(chunk.size_bytes),
            chunk.items
        );
    }
    println!(
        "total: {} item(s), {} across {} chunk(s)",
        report.total_items,
        format_bytes(report.total_bytes),
        report.chunks.len()
    );
}

pub fn print_state_summary(state: &ProgressState) {
    match &state.last_item_id {
        Some(id) => println!("last archived item: {id}"),
        None => println!("no progress recorded yet"),
    }
    println!(
        "current chunk: {} ({} occupied)",
        state.current_chunk_index,
        format_bytes(state.current_chunk_occupied_bytes)
    );
}
