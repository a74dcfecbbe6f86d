//! The worker half of `fanout run`: one process, one feature, the whole
//! lifecycle from lock to terminal manifest entry.

use std::fs;

use anyhow::Context;

use super::{RunArgs, RunSettings, WorkerParams};
use crate::config::Config;
use crate::envfiles;
use crate::error::ExitError;
use crate::instructions::{self, TaskBrief};
use crate::lockfile::{self, FeatureLock};
use crate::manifest::{FeatureStatus, ManifestEntry, ManifestStore, now_iso};
use crate::ports;
use crate::workspace::{self, CreateOutcome, TeardownOutcome};

/// Recorded in the manifest when the worker died before its agent ran.
const SETUP_FAILURE_CODE: i32 = -1;

pub fn run_worker(args: &RunArgs, params: WorkerParams) -> anyhow::Result<()> {
    let repo = super::find_repo_root()?;
    let config = Config::load_or_default(&repo)?;
    let settings = RunSettings::resolve(args, repo, &config)?;

    fs::create_dir_all(&settings.parent).with_context(|| {
        format!(
            "creating workspace parent {}",
            settings.parent.display()
        )
    })?;
    let lock = lockfile::acquire(&settings.parent, &params.slug)?;
    install_interrupt_handler(&lock)?;

    let store = ManifestStore::new(&settings.parent);
    let port_shift = effective_port_shift(&settings, &params);
    record_start(&store, &settings, &params, port_shift);

    eprintln!("=== Feature: {} ===", params.slug);
    match run_feature(&settings, &params, port_shift) {
        Ok(0) => {
            record_finish(&store, &params.slug, FeatureStatus::Completed, Some(0));
            if settings.cleanup {
                cleanup_workspace(&settings, &params.slug);
            }
            eprintln!("✓ {} completed", params.slug);
            Ok(())
        }
        Ok(code) => {
            record_finish(&store, &params.slug, FeatureStatus::Failed, Some(code));
            cleanup_workspace(&settings, &params.slug);
            eprintln!("✗ {} failed (agent exit {code})", params.slug);
            Err(ExitError::new(
                exit_byte(code),
                format!("agent exited with code {code} for '{}'", params.slug),
            )
            .into())
        }
        Err(e) => {
            record_finish(
                &store,
                &params.slug,
                FeatureStatus::Failed,
                Some(SETUP_FAILURE_CODE),
            );
            cleanup_workspace(&settings, &params.slug);
            Err(e)
        }
    }
}

fn run_feature(
    settings: &RunSettings,
    params: &WorkerParams,
    port_shift: u32,
) -> anyhow::Result<i32> {
    let outcome = workspace::create(
        &settings.repo,
        &settings.parent,
        &params.slug,
        &settings.base,
    )?;
    let ws = workspace::workspace_path(&settings.parent, &params.slug);
    match outcome {
        CreateOutcome::Created => eprintln!("✓ created workspace {}", ws.display()),
        CreateOutcome::Reused => eprintln!("• reusing workspace {}", ws.display()),
    }

    let copied = envfiles::copy_env_files(&settings.repo, &ws, &settings.parent)?;
    eprintln!("✓ copied {} env file(s)", copied.len());

    let rewrites = if settings.rewrite_ports {
        ports::rewrite_ports(&ws, &copied, params.index, u32::from(settings.port_offset))?
    } else {
        Vec::new()
    };
    if !rewrites.is_empty() {
        eprintln!("✓ shifted {} port variable(s) by +{port_shift}", rewrites.len());
    }

    let brief = instructions::render_task_brief(&TaskBrief {
        description: params.description.clone(),
        branch: workspace::branch_name(&params.slug),
        ports_shifted: !rewrites.is_empty(),
        issue_context: params.issue_context.clone(),
    })?;

    eprintln!("• agent running (turn budget {})", settings.agent.turns);
    settings.agent.run(&ws, &brief)
}

/// Drop impls don't run on SIGINT; remove the lock by hand before dying.
fn install_interrupt_handler(lock: &FeatureLock) -> anyhow::Result<()> {
    let path = lock.path().to_path_buf();
    ctrlc::set_handler(move || {
        FeatureLock::release_path(&path);
        std::process::exit(130);
    })
    .context("installing interrupt handler")
}

/// The port shift this feature runs under, as recorded in the manifest.
fn effective_port_shift(settings: &RunSettings, params: &WorkerParams) -> u32 {
    if settings.rewrite_ports {
        u32::try_from(params.index).unwrap_or(0) * u32::from(settings.port_offset)
    } else {
        0
    }
}

// Manifest writes degrade to warnings; a broken ledger must not kill a
// feature that can still run to completion.
fn record_start(
    store: &ManifestStore,
    settings: &RunSettings,
    params: &WorkerParams,
    port_shift: u32,
) {
    let entry = ManifestEntry {
        slug: params.slug.clone(),
        description: params.description.clone(),
        branch: workspace::branch_name(&params.slug),
        worktree: workspace::workspace_path(&settings.parent, &params.slug)
            .to_string_lossy()
            .into_owned(),
        index: params.index,
        port_offset: port_shift,
        pid: std::process::id(),
        status: FeatureStatus::Running,
        started: now_iso(),
        completed: None,
        exit_code: None,
        issue_number: params.issue_number,
        source: params.source,
    };
    if let Err(e) = store.init().and_then(|()| store.append(entry)) {
        tracing::warn!("manifest update failed: {e:#}");
    }
}

fn record_finish(
    store: &ManifestStore,
    slug: &str,
    status: FeatureStatus,
    exit_code: Option<i32>,
) {
    if let Err(e) = store.update_status(slug, status, exit_code) {
        tracing::warn!("manifest update failed: {e:#}");
    }
}

/// Teardown failures are logged, never allowed to mask the primary result.
fn cleanup_workspace(settings: &RunSettings, slug: &str) {
    match workspace::teardown(&settings.repo, &settings.parent, slug, &settings.base) {
        Ok(TeardownOutcome::Clean) => eprintln!("✓ workspace removed"),
        Ok(TeardownOutcome::BranchKept { ahead }) => {
            eprintln!("• workspace removed; branch kept ({ahead} commit(s) ahead)");
        }
        Err(e) => tracing::warn!("workspace teardown failed for '{slug}': {e:#}"),
    }
}

/// Map a nonzero agent exit code into this process's own exit byte.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
