//! Interface de terminal do baton: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para estilização.
//! A barra acompanha o job apenas pelo [`ProgressInspector`], sem nunca
//! tocar no estado do job.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::progress::{JobProgress, ProgressInspector, ProgressStatus};
use crate::state_machine::JobReport;

/// Barra de progresso de um job em execução.
pub struct BatchProgressBar {
    pb: ProgressBar,
}

impl BatchProgressBar {
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn update(&self, progress: &JobProgress) {
        self.pb.set_position(progress.processed_count as u64);
        let current = progress.current_item_title.as_deref().unwrap_or("");
        self.pb.set_message(format!(
            "run #{} | {} failed | {current}",
            progress.current_continuation, progress.failure_count
        ));
    }

    /// Segue o inspector até o job terminar ou o publicador desaparecer.
    pub async fn follow(self, mut inspector: ProgressInspector) {
        loop {
            let progress = inspector.get_progress();
            self.update(&progress);
            if progress.status == ProgressStatus::Completed || !inspector.changed().await {
                break;
            }
        }
        self.pb.finish_and_clear();
    }
}

/// Imprime o relatório final com estilo colorido.
pub fn print_report(report: &JobReport) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    let mark = if report.failure_count == 0 {
        green.apply_to("✓")
    } else {
        red.apply_to("✗")
    };
    println!(
        "  {mark} Job {} finished: {} reviewed, {} failed of {}",
        report.job_id, report.success_count, report.failure_count, report.total_count
    );
    println!(
        "  {}",
        dim.apply_to(format!(
            "{} continuation(s), {}ms total",
            report.continuation_count, report.total_duration_ms
        ))
    );

    for failure in &report.failures {
        println!("    {} {}: {}", red.apply_to("✗"), failure.title, failure.error);
    }
}

/// Imprime um snapshot de progresso, para o subcomando `status`.
pub fn print_progress(job_id: &str, progress: &JobProgress) {
    let status_style = match progress.status {
        ProgressStatus::Completed => Style::new().green().bold(),
        ProgressStatus::Processing => Style::new().yellow(),
        ProgressStatus::InProgress => Style::new().cyan(),
    };
    println!("  Job {job_id}: {}", status_style.apply_to(progress.status));
    println!(
        "  {}/{} processed ({:.1}%), {} reviewed, {} failed, continuation #{}",
        progress.processed_count,
        progress.total_count,
        progress.percent_complete,
        progress.success_count,
        progress.failure_count,
        progress.current_continuation
    );
}
