// src/commands/install.rs
//! Install and uninstall commands

use super::{Environment, check_input_file, selection_args};
use crate::cli::{IndexArgs, SelectionArgs, UpgradeStrategy};
use crate::error::{Error, Result};
use crate::session::compile::find_mpy_cross;
use dialoguer::Confirm;
use std::path::PathBuf;
use tracing::info;

/// Install-only flags
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub upgrade: bool,
    pub upgrade_strategy: UpgradeStrategy,
    pub force_reinstall: bool,
    pub compile: bool,
    pub mpy_cross: Option<PathBuf>,
}

pub fn install_args(selection: &SelectionArgs, options: &InstallOptions) -> Result<Vec<String>> {
    let mut args = vec![
        "install".to_string(),
        "--no-compile".to_string(),
        "--use-pep517".to_string(),
    ];
    if options.upgrade {
        args.push("--upgrade".to_string());
    }
    args.push("--upgrade-strategy".to_string());
    args.push(
        match options.upgrade_strategy {
            UpgradeStrategy::OnlyIfNeeded => "only-if-needed",
            UpgradeStrategy::Eager => "eager",
        }
        .to_string(),
    );
    if options.force_reinstall {
        args.push("--force-reinstall".to_string());
    }
    args.extend(selection_args(selection, "install")?);
    Ok(args)
}

pub fn uninstall_args(packages: &[String], requirement: &[PathBuf]) -> Result<Vec<String>> {
    if packages.is_empty() && requirement.is_empty() {
        return Err(Error::user(
            "You must give at least one requirement to uninstall (see \"pipkin help uninstall\")",
        ));
    }
    // pip must not prompt; confirmation happens before the target changes
    let mut args = vec!["uninstall".to_string(), "--yes".to_string()];
    for path in requirement {
        check_input_file(path, "requirements")?;
        args.push("-r".to_string());
        args.push(path.display().to_string());
    }
    args.extend(packages.iter().cloned());
    Ok(args)
}

/// Install or upgrade distributions on the target
pub fn cmd_install(
    env: &Environment,
    selection: &SelectionArgs,
    index: &IndexArgs,
    options: &InstallOptions,
) -> Result<()> {
    let mut args = install_args(selection, options)?;
    let mpy_cross = if options.compile {
        Some(find_mpy_cross(options.mpy_cross.as_deref())?)
    } else {
        None
    };

    let route = env.index_route(index)?;
    args.extend(route.args.iter().cloned());
    info!("Installing {}", selection.specs.join(", "));

    let outcome = env.with_session(|session| session.install(&args, mpy_cross.as_deref()))?;
    env.print_output(&outcome.installer, false);
    if outcome.operations.is_empty() && !env.quiet {
        println!("Target is up to date.");
    }
    Ok(())
}

/// Remove distributions from the target after confirmation
pub fn cmd_uninstall(
    env: &Environment,
    packages: &[String],
    requirement: &[PathBuf],
    yes: bool,
) -> Result<()> {
    let args = uninstall_args(packages, requirement)?;

    let mut confirm = |names: &[String]| -> Result<bool> {
        if yes {
            return Ok(true);
        }
        Confirm::new()
            .with_prompt(format!("Proceed removing {} from the target?", names.join(", ")))
            .default(true)
            .interact()
            .map_err(|e| Error::user(format!("Could not read confirmation: {e}")))
    };

    let outcome = env.with_session(|session| session.uninstall(&args, &mut confirm))?;
    env.print_output(&outcome.installer, false);
    if !outcome.applied && !env.quiet {
        println!("Nothing removed.");
    } else if outcome.removed.is_empty() && !env.quiet {
        println!("Nothing to remove.");
    }
    Ok(())
}
