//! Last-run command handler
//!
//! Reads this host's audit log back and reports recorded runs.

use anyhow::{Context, Result};
use colored::*;
use std::io::{self, ErrorKind, Write};
use std::process::ExitCode;
use upkeep_core::domain::host::HostContext;
use upkeep_core::domain::log::TIMESTAMP_FORMAT;
use upkeep_core::domain::outcome::UpdateOutcome;
use upkeep_core::history::{self, RunRecord};

use crate::config::Config;

/// Which recorded runs to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Latest,
    LatestSuccess,
    All,
}

impl Selection {
    pub fn from_flags(all: bool, success: bool) -> Self {
        if all {
            Selection::All
        } else if success {
            Selection::LatestSuccess
        } else {
            Selection::Latest
        }
    }
}

pub fn handle_last_run(
    config: &Config,
    host: &HostContext,
    json: bool,
    selection: Selection,
) -> Result<ExitCode> {
    let mut stdout = io::stdout().lock();
    if report_runs(&mut stdout, config, host, json, selection)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Writes the selected runs to `out`; `false` when there is nothing to show
///
/// Notices go to stderr so `out` only ever carries the report.
fn report_runs<W: Write>(
    out: &mut W,
    config: &Config,
    host: &HostContext,
    json: bool,
    selection: Selection,
) -> Result<bool> {
    let path = config.log_dir.join(host.log_file_name());

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            eprintln!(
                "{}",
                format!("No audit log at {}", path.display()).yellow()
            );
            return Ok(false);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let runs = select_runs(&content, selection);
    if runs.is_empty() {
        eprintln!("{}", "No runs recorded.".yellow());
        return Ok(false);
    }

    if json {
        let rendered = if selection == Selection::All {
            serde_json::to_string_pretty(&runs)?
        } else {
            serde_json::to_string_pretty(&runs[0])?
        };
        writeln!(out, "{}", rendered)?;
    } else {
        if selection == Selection::All {
            writeln!(out, "{}", format!("Found {} run(s):", runs.len()).bold())?;
            writeln!(out)?;
        }
        for run in &runs {
            write_run_summary(out, run)?;
        }
    }

    Ok(true)
}

fn select_runs(content: &str, selection: Selection) -> Vec<RunRecord> {
    match selection {
        Selection::All => history::read_runs(content),
        Selection::Latest => history::last_run(content).into_iter().collect(),
        Selection::LatestSuccess => history::last_success(content).into_iter().collect(),
    }
}

fn write_run_summary<W: Write>(out: &mut W, run: &RunRecord) -> io::Result<()> {
    writeln!(
        out,
        "  {} {} on {}",
        "▸".cyan(),
        run.os_description.bold(),
        run.hostname
    )?;
    writeln!(out, "    Outcome:   {}", colorize_outcome(run.outcome))?;
    writeln!(
        out,
        "    Started:   {}",
        run.started_at.format(TIMESTAMP_FORMAT).to_string().dimmed()
    )?;
    if let Some(finished_at) = run.finished_at {
        writeln!(
            out,
            "    Finished:  {}",
            finished_at.format(TIMESTAMP_FORMAT).to_string().dimmed()
        )?;
    }
    for warning in &run.warnings {
        writeln!(out, "    {}  {}", "Warning:".yellow(), warning)?;
    }
    writeln!(out)
}

fn colorize_outcome(outcome: Option<UpdateOutcome>) -> ColoredString {
    match outcome {
        Some(UpdateOutcome::Success) => "success".green(),
        Some(UpdateOutcome::Failure) => "failure".red(),
        None => "interrupted".yellow(),
    }
}
