//! Commands that run the manifest against the persisted mock cloud

use anyhow::{Result, bail};
use converge::{
    ApiTarget, ChangeDescriptor, DryRunTarget, Error, RunContext, RunOptions, RunReport,
    check_no_changes,
};
use mockcloud::MockCloud;
use std::path::Path;

use crate::Context;
use crate::manifest::Manifest;
use crate::progress::RunProgress;
use crate::state::StateFile;
use crate::ui;

/// Flags shared by commands that change the cloud
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub jobs: Option<usize>,
    pub timeout: Option<u64>,
    pub yes: bool,
}

fn load(ctx: &Context, manifest_path: &Path) -> Result<(Manifest, StateFile)> {
    let manifest = Manifest::load(manifest_path)?;
    let state = StateFile::load(&ctx.state_path)?;
    if ctx.verbose > 0 {
        ui::kv("manifest", &manifest_path.display().to_string());
        ui::kv("state", &ctx.state_path.display().to_string());
        ui::kv("saved", &state.last_updated.to_rfc3339());
    }
    Ok((manifest, state))
}

/// Dry run over fresh tasks, returning the report and recorded changes
fn preview(
    cloud: &MockCloud,
    manifest: &Manifest,
    options: RunOptions,
) -> Result<(RunReport, Vec<ChangeDescriptor>)> {
    let tasks = manifest.tasks()?;
    let target = DryRunTarget::new();
    let report = RunContext::new(cloud, &target)
        .with_options(options)
        .run_tasks(&tasks)?;
    Ok((report, target.changes()))
}

/// Show what apply would change
pub fn plan(ctx: &Context, manifest_path: &Path) -> Result<()> {
    let (manifest, state) = load(ctx, manifest_path)?;
    let cloud = state.cloud();

    let (report, changes) = preview(&cloud, &manifest, ctx.settings.run_options(None, None))?;
    ui::display_changes(&changes);
    ui::display_problems(&report);
    report.ensure_success()?;
    Ok(())
}

/// Plan, confirm, apply, and save the resulting cloud
pub fn apply(ctx: &Context, manifest_path: &Path, opts: &ApplyOptions) -> Result<()> {
    let (manifest, mut state) = load(ctx, manifest_path)?;
    let cloud = state.cloud();
    let options = ctx.settings.run_options(opts.jobs, opts.timeout);

    let (plan, changes) = preview(&cloud, &manifest, options.clone())?;
    ui::display_changes(&changes);
    if !plan.is_success() {
        ui::display_problems(&plan);
        plan.ensure_success()?;
    }
    if changes.is_empty() {
        return Ok(());
    }

    if !opts.yes && !ui::confirm("Apply these changes?")? {
        ui::error("Aborted");
        return Ok(());
    }

    let tasks = manifest.tasks()?;
    let progress = RunProgress::new(tasks.len(), "Applying", ctx.quiet);
    let result = RunContext::new(&cloud, &ApiTarget)
        .with_options(options)
        .with_progress(&progress)
        .run_tasks(&tasks);
    progress.finish();

    // Whatever was applied is real, even if the run stopped short
    state.save(&ctx.state_path, &cloud)?;

    let report = result?;
    ui::display_problems(&report);
    ui::print_summary(&report);
    report.ensure_success()?;
    Ok(())
}

/// Fail unless the cloud already matches the manifest
pub fn check(ctx: &Context, manifest_path: &Path) -> Result<()> {
    let (manifest, state) = load(ctx, manifest_path)?;
    let cloud = state.cloud();
    let tasks = manifest.tasks()?;

    match check_no_changes(&cloud, &tasks, ctx.settings.run_options(None, None)) {
        Ok(()) => {
            ui::success("Cloud matches the manifest");
            Ok(())
        }
        Err(Error::UnexpectedChanges(changes)) => {
            ui::display_changes(&changes);
            bail!("{} task(s) would change", changes.len())
        }
        Err(err) => Err(err.into()),
    }
}

/// Revoke ingress permissions selected by the groups' removal rules
pub fn prune(ctx: &Context, manifest_path: &Path, dry_run: bool, yes: bool) -> Result<()> {
    let (manifest, mut state) = load(ctx, manifest_path)?;
    let cloud = state.cloud();
    let options = ctx.settings.run_options(None, None);
    let tasks = manifest.tasks()?;

    // Discovery: a dry run resolves the ids of resources that already exist
    let discovery = DryRunTarget::new();
    let report = RunContext::new(&cloud, &discovery)
        .with_options(options.clone())
        .run_tasks(&tasks)?;
    if !report.is_success() {
        ui::display_problems(&report);
        report.ensure_success()?;
    }
    if discovery.has_changes() {
        ui::warn("Cloud does not match the manifest yet; resources still to be created are not pruned");
    }

    let preview = DryRunTarget::new();
    let report = RunContext::new(&cloud, &preview)
        .with_options(options.clone())
        .run_deletions(&tasks)?;
    let deletions = preview.changes();
    ui::display_changes(&deletions);
    ui::display_problems(&report);
    report.ensure_success()?;

    if deletions.is_empty() {
        return Ok(());
    }
    if dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(());
    }
    if !yes && !ui::confirm("Revoke these permissions?")? {
        ui::error("Aborted");
        return Ok(());
    }

    let progress = RunProgress::new(tasks.len(), "Pruning", ctx.quiet);
    let result = RunContext::new(&cloud, &ApiTarget)
        .with_options(options)
        .with_progress(&progress)
        .run_deletions(&tasks);
    progress.finish();
    state.save(&ctx.state_path, &cloud)?;

    let report = result?;
    ui::display_problems(&report);
    ui::print_summary(&report);
    report.ensure_success()?;
    Ok(())
}
