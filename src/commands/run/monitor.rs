//! Polls background workers until every one reaches a terminal state.
//!
//! The monitor never kills anything. Ctrl-C detaches, leaving workers to
//! finish on their own with their logs still on disk.

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;

use super::dispatch::BackgroundWorker;
use crate::commands::doctor::OutputFormat;
use crate::commands::status;
use crate::error::ExitError;
use crate::manifest::ManifestStore;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Succeeded,
    Failed(i32),
}

impl WorkerState {
    const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    const fn glyph(self) -> &'static str {
        match self {
            Self::Running => "•",
            Self::Succeeded => "✓",
            Self::Failed(_) => "✗",
        }
    }

    fn label(self) -> String {
        match self {
            Self::Running => "running".to_string(),
            Self::Succeeded => "completed".to_string(),
            Self::Failed(code) => format!("failed (exit {code})"),
        }
    }
}

/// Watch detached workers to completion, redrawing one status line per
/// feature. Returns an error when any feature failed so the coordinator
/// exits nonzero.
pub fn watch(mut workers: Vec<BackgroundWorker>, store: &ManifestStore) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("installing interrupt handler")?;
    }

    let started = Instant::now();
    let live = std::io::stderr().is_terminal();
    let width = workers.iter().map(|w| w.slug.len()).max().unwrap_or(0);
    let mut states = vec![WorkerState::Running; workers.len()];
    let mut drawn = false;

    eprintln!();
    loop {
        for (worker, state) in workers.iter_mut().zip(states.iter_mut()) {
            if state.is_terminal() {
                continue;
            }
            let next = match worker.child.try_wait() {
                Ok(Some(exit)) => {
                    let code = exit.code().unwrap_or(-1);
                    if code == 0 {
                        WorkerState::Succeeded
                    } else {
                        WorkerState::Failed(code)
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("could not poll worker '{}': {e}", worker.slug);
                    WorkerState::Failed(-1)
                }
            };
            *state = next;
            if !live {
                eprintln!("  {} {:<width$}  {}", next.glyph(), worker.slug, next.label());
            }
        }

        if live {
            redraw(&workers, &states, width, started.elapsed(), drawn);
            drawn = true;
        }

        if states.iter().all(|s| s.is_terminal()) {
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            eprintln!();
            eprintln!("Detached; workers keep running. Logs:");
            for worker in &workers {
                eprintln!("  {}", worker.log_path.display());
            }
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let failed = states
        .iter()
        .filter(|s| matches!(s, WorkerState::Failed(_)))
        .count();
    let total = workers.len();
    eprintln!();
    eprintln!(
        "{}/{} feature(s) succeeded in {}",
        total - failed,
        total,
        fmt_elapsed(started.elapsed())
    );

    if store.exists() {
        eprintln!();
        status::print_report(store, OutputFormat::Pretty)?;
    }

    if failed > 0 {
        return Err(ExitError::Other(format!("{failed} feature(s) failed")).into());
    }
    Ok(())
}

fn redraw(
    workers: &[BackgroundWorker],
    states: &[WorkerState],
    width: usize,
    elapsed: Duration,
    rewind: bool,
) {
    if rewind {
        eprint!("\x1b[{}A", workers.len() + 1);
    }
    for (worker, state) in workers.iter().zip(states) {
        eprintln!(
            "\x1b[2K  {} {:<width$}  {}",
            state.glyph(),
            worker.slug,
            state.label()
        );
    }
    let done = states.iter().filter(|s| s.is_terminal()).count();
    eprintln!(
        "\x1b[2K[{done}/{}] {} elapsed",
        workers.len(),
        fmt_elapsed(elapsed)
    );
}

fn fmt_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
