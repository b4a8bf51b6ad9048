use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use serde::Serialize;

use crate::director::cycle::{CeStatus, CycleReport, QueueListing};
use crate::director::descriptor::{CI, CPU_TIME, PUE, ParameterValue};
use crate::director::scoring::{RankedQueue, round2};

#[derive(clap::ValueEnum, Clone)]
pub enum Outputs {
    CLI,
    JSON,
    Quiet,
}

pub trait Output {
    fn print_cycle_report(&self, report: &CycleReport);
    fn print_queue_listing(&self, listing: &QueueListing);
    fn print_error(&self, error: anyhow::Error);
}

pub fn create_output(mode: &Outputs, color_policy: ColorChoice) -> Box<dyn Output> {
    match mode {
        Outputs::CLI => Box::new(CliOutput::new(color_policy)),
        Outputs::JSON => Box::new(JsonOutput),
        Outputs::Quiet => Box::new(Quiet),
    }
}

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table);
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

fn optional_cell(value: Option<&ParameterValue>) -> CellStruct {
    match value {
        Some(value) => value.to_string().cell().justify(Justify::Right),
        None => "".cell(),
    }
}

fn metric_cell(queue: &RankedQueue, key: &str) -> CellStruct {
    match queue.parameters.get(key).and_then(ParameterValue::as_f64) {
        Some(value) => round2(value).cell().justify(Justify::Right),
        None => "".cell(),
    }
}

impl Output for CliOutput {
    fn print_cycle_report(&self, report: &CycleReport) {
        let rows: Vec<_> = report
            .ranking
            .iter()
            .enumerate()
            .map(|(index, queue)| {
                let load = format!("{:.2}", queue.load.load_factor()).cell();
                let load = if queue.load.is_live() {
                    load
                } else {
                    load.foreground_color(Some(Color::Red))
                };
                vec![
                    (index + 1).cell(),
                    queue.queue_name.as_str().cell(),
                    queue.site.as_str().cell(),
                    queue.ce_name.as_str().cell(),
                    optional_cell(queue.parameters.get(CPU_TIME)),
                    metric_cell(queue, PUE),
                    metric_cell(queue, CI),
                    load.justify(Justify::Right),
                    queue.score.to_string().cell().justify(Justify::Right),
                ]
            })
            .collect();

        let header = vec![
            "#".cell().bold(true),
            "Queue".cell().bold(true),
            "Site".cell().bold(true),
            "CE".cell().bold(true),
            "CPU time".cell().bold(true),
            "PUE".cell().bold(true),
            "CI".cell().bold(true),
            "Load".cell().bold(true),
            "Score".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);

        println!(
            "Cycle {}: {} queue(s) ranked by the {} strategy in {} ms",
            report.cycle,
            report.ranking.len(),
            report.strategy,
            report.duration.as_millis()
        );
        if report.synthesized_metrics > 0 {
            println!(
                "{} site metric value(s) were synthesized",
                report.synthesized_metrics
            );
        }
        for error in &report.errors {
            println!("Warning: {error}");
        }
        if let Some(error) = &report.submission_error {
            println!("Submission failed: {error}");
        }
    }

    fn print_queue_listing(&self, listing: &QueueListing) {
        let rows: Vec<_> = listing
            .queues
            .iter()
            .map(|queue| {
                let status = match &queue.status {
                    CeStatus::Live(snapshot) => format!(
                        "Running: {}, Waiting: {}, Max: {}",
                        snapshot.running, snapshot.waiting, snapshot.max_total
                    )
                    .cell(),
                    CeStatus::Unavailable { error } => {
                        error.as_str().cell().foreground_color(Some(Color::Red))
                    }
                };
                vec![
                    queue.site.as_str().cell(),
                    queue.ce_name.as_str().cell(),
                    queue.ce_type.as_str().cell(),
                    queue.queue_name.as_str().cell(),
                    optional_cell(queue.cpu_time.as_ref()),
                    optional_cell(queue.max_total_jobs.as_ref()),
                    optional_cell(queue.max_waiting_jobs.as_ref()),
                    status,
                ]
            })
            .collect();

        let header = vec![
            "Site".cell().bold(true),
            "CE".cell().bold(true),
            "Type".cell().bold(true),
            "Queue".cell().bold(true),
            "CPUTime".cell().bold(true),
            "MaxTotalJobs".cell().bold(true),
            "MaxWaitingJobs".cell().bold(true),
            "Status".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);

        for error in &listing.unresolved {
            println!("{}: no CE handle ({error})", error.queue());
        }
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}

#[derive(Default)]
pub struct JsonOutput;

impl JsonOutput {
    fn print<T: Serialize>(&self, data: &T) {
        match serde_json::to_string_pretty(data) {
            Ok(json) => println!("{json}"),
            Err(error) => log::error!("Cannot serialize output: {error}"),
        }
    }
}

impl Output for JsonOutput {
    fn print_cycle_report(&self, report: &CycleReport) {
        self.print(report);
    }

    fn print_queue_listing(&self, listing: &QueueListing) {
        self.print(listing);
    }

    fn print_error(&self, error: anyhow::Error) {
        self.print(&serde_json::json!({ "error": format!("{error:?}") }));
    }
}

/// Prints only queue names, one per line, in rank order.
#[derive(Default)]
pub struct Quiet;

impl Output for Quiet {
    fn print_cycle_report(&self, report: &CycleReport) {
        for queue in &report.ranking {
            println!("{}", queue.queue_name);
        }
    }

    fn print_queue_listing(&self, listing: &QueueListing) {
        for queue in &listing.queues {
            println!("{}", queue.queue_name);
        }
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}
