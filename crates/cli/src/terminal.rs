use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use maidx_batch::{BatchReport, JobState, ProgressEvent};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const SUCCESS: Color = Color::Green;
    const RETRY: Color = Color::Yellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Progress lines for a running batch.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_banner(&self, model: &str, workers: usize, files: usize) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("maidx"),
            ResetColor,
            Print(" - structured extraction\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Model: {model} | Workers: {workers} | Files: {files}\n")),
            Print("Ctrl+C stops after the running turns.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn display_event(&self, event: &ProgressEvent) -> Result<()> {
        let (color, line) = match event {
            ProgressEvent::BatchStarted { total } => (Colors::DIM, format!("Processing {total} document(s)")),
            ProgressEvent::JobStarted {
                document_id,
                attempt,
                ..
            } => {
                if *attempt > 1 {
                    (Colors::DIM, format!("  {document_id}: attempt {attempt}"))
                } else {
                    (Colors::DIM, format!("  {document_id}: started"))
                }
            }
            ProgressEvent::JobRetrying {
                document_id,
                delay_ms,
                reason,
                ..
            } => (
                Colors::RETRY,
                format!("  {document_id}: retrying in {delay_ms} ms ({reason})"),
            ),
            ProgressEvent::JobFinished {
                document_id,
                state,
                completed,
                failed,
                total,
                ..
            } => {
                let (color, label) = match state {
                    JobState::Succeeded => (Colors::SUCCESS, "done"),
                    _ => (Colors::ERROR, "failed"),
                };
                (
                    color,
                    format!("[{}/{total}] {document_id}: {label}", completed + failed),
                )
            }
            ProgressEvent::BatchFinished {
                completed,
                failed,
                total,
            } => (
                Colors::HEADER,
                format!("Finished: {completed} succeeded, {failed} failed, {total} total"),
            ),
        };

        let mut stdout = io::stdout();
        execute!(stdout, SetForegroundColor(color), Print(line), Print("\n"), ResetColor)?;
        stdout.flush()?;
        Ok(())
    }

    /// One line per failed document with its failure kind.
    pub fn print_failures(&self, report: &BatchReport) -> Result<()> {
        let mut stdout = io::stdout();
        for failure in report.failures() {
            execute!(
                stdout,
                SetForegroundColor(Colors::ERROR),
                Print(format!(
                    "  {} [{}]: {}\n",
                    failure.document_id, failure.failure.kind, failure.failure.message
                )),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}
