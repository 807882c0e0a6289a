// src/commands/mod.rs
//! Command handlers for the pipkin CLI
//!
//! Every handler turns its flags into pip arguments, starts the index
//! proxy when the command needs an index and runs a session against the
//! selected target.

mod cache;
mod install;
mod query;

pub use cache::cmd_cache;
pub use install::{cmd_install, cmd_uninstall};
pub use query::{cmd_check, cmd_download, cmd_freeze, cmd_list, cmd_show, cmd_wheel};

use crate::cli::{Cli, Commands, IndexArgs, SelectionArgs, TargetArgs};
use crate::config::{Config, FileConfig, IndexOverrides};
use crate::error::{Error, Result};
use crate::progress::{ConsoleProgress, Progress, SilentProgress};
use crate::proxy::{ProxyHandle, ProxyState, preferred_port};
use crate::session::{InstallerOutput, PipInstaller, Session};
use crate::target::TargetSpec;
use std::io::IsTerminal;
use std::path::Path;
use tracing::{debug, info};

/// Distributions of the workspace itself, never reported as installed
pub const ALWAYS_EXCLUDED: [&str; 4] = ["pip", "pkg_resources", "setuptools", "wheel"];

/// Dispatch a parsed command line
pub fn run(cli: Cli, file: FileConfig) -> Result<()> {
    let Cli {
        target,
        quiet,
        command,
        ..
    } = cli;

    match command {
        Commands::Install {
            selection,
            index,
            upgrade,
            upgrade_strategy,
            force_reinstall,
            compile,
            mpy_cross,
        } => {
            let env = Environment::new(&file, &index, &target, quiet)?;
            let options = install::InstallOptions {
                upgrade,
                upgrade_strategy,
                force_reinstall,
                compile,
                mpy_cross,
            };
            cmd_install(&env, &selection, &index, &options)
        }
        Commands::Uninstall {
            packages,
            requirement,
            yes,
        } => {
            let env = Environment::new(&file, &IndexArgs::default(), &target, quiet)?;
            cmd_uninstall(&env, &packages, &requirement, yes)
        }
        Commands::List {
            index,
            outdated,
            uptodate,
            not_required,
            pre,
            format,
            exclude,
        } => {
            let env = Environment::new(&file, &index, &target, quiet)?;
            let options = query::ListOptions {
                outdated,
                uptodate,
                not_required,
                pre,
                format,
                exclude,
            };
            cmd_list(&env, &index, &options)
        }
        Commands::Show { packages } => {
            let env = Environment::new(&file, &IndexArgs::default(), &target, quiet)?;
            cmd_show(&env, &packages)
        }
        Commands::Freeze { exclude } => {
            let env = Environment::new(&file, &IndexArgs::default(), &target, quiet)?;
            cmd_freeze(&env, &exclude)
        }
        Commands::Check => {
            let env = Environment::new(&file, &IndexArgs::default(), &target, quiet)?;
            cmd_check(&env)
        }
        Commands::Download {
            selection,
            index,
            dest,
        } => {
            let env = Environment::new(&file, &index, &target, quiet)?;
            cmd_download(&env, &selection, &index, &dest)
        }
        Commands::Wheel {
            selection,
            index,
            wheel_dir,
        } => {
            let env = Environment::new(&file, &index, &target, quiet)?;
            cmd_wheel(&env, &selection, &index, &wheel_dir)
        }
        Commands::Cache { action } => {
            let config = Config::resolve(file, IndexOverrides::default());
            cmd_cache(&config, action, quiet)
        }
    }
}

/// Everything a handler needs besides its own flags
pub struct Environment {
    pub config: Config,
    pub target: TargetSpec,
    pub quiet: bool,
}

impl Environment {
    /// Validate flags and settle the configuration; nothing is started yet
    pub fn new(
        file: &FileConfig,
        index: &IndexArgs,
        target: &TargetArgs,
        quiet: bool,
    ) -> Result<Self> {
        validate_index_args(index)?;
        let config = Config::resolve(file.clone(), index_overrides(index));
        let target = TargetSpec::from_options(
            target.port.clone(),
            target.mount.clone(),
            target.dir.clone(),
        )?;
        debug!("Target: {:?}", target);
        Ok(Self {
            config,
            target,
            quiet,
        })
    }

    pub fn progress(&self) -> Box<dyn Progress> {
        if self.quiet {
            Box::new(SilentProgress)
        } else {
            Box::new(ConsoleProgress::new())
        }
    }

    /// Open the target and the installer workspace, run `f`, then close the
    /// target whatever `f` returned
    pub fn with_session<T>(&self, f: impl FnOnce(&mut Session<'_>) -> Result<T>) -> Result<T> {
        let color = std::io::stdout().is_terminal();
        let mut installer = PipInstaller::prepare(&self.config.python, &self.config.cache_dir, color)?;
        let mut target = self.target.open()?;
        let progress = self.progress();

        let mut session = Session::new(target.as_mut(), &mut installer, progress.as_ref());
        let result = f(&mut session);
        let closed = session.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Start the index proxy unless `--no-index` was given; the returned
    /// route holds it until dropped
    pub fn index_route(&self, index: &IndexArgs) -> Result<IndexRoute> {
        if index.no_index {
            return Ok(IndexRoute {
                args: installer_index_args(index, None),
                _proxy: None,
            });
        }

        let state = ProxyState::from_settings(&self.config.index, self.config.fetch_timeout)?
            .with_irrelevant(self.config.irrelevant_packages.iter());
        let port = self
            .config
            .proxy_port
            .unwrap_or_else(|| preferred_port(self.config.index.no_mp_org));
        let proxy = ProxyHandle::start(state, port)?;
        info!("Installer will use index {}", proxy.index_url());
        Ok(IndexRoute {
            args: installer_index_args(index, Some(&proxy.index_url())),
            _proxy: Some(proxy),
        })
    }

    /// Print what the installer said, honoring `--quiet` for chatter
    pub fn print_output(&self, output: &InstallerOutput, is_result: bool) {
        if is_result || !self.quiet {
            print!("{}", output.stdout);
        }
        if !self.quiet && !output.stderr.is_empty() {
            eprint!("{}", output.stderr);
        }
    }
}

/// Index arguments for the installer plus the proxy serving them
pub struct IndexRoute {
    pub args: Vec<String>,
    _proxy: Option<ProxyHandle>,
}

pub fn index_overrides(index: &IndexArgs) -> IndexOverrides {
    IndexOverrides {
        index_url: index.index_url.clone(),
        extra_index_urls: index.extra_index_url.clone(),
        no_mp_org: index.no_mp_org,
    }
}

pub fn validate_index_args(index: &IndexArgs) -> Result<()> {
    if index.no_index && index.find_links.is_none() {
        return Err(Error::user("--no-index requires --find-links"));
    }
    Ok(())
}

/// Index flags for pip: the proxy replaces every configured index
pub fn installer_index_args(index: &IndexArgs, proxy_url: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    match proxy_url {
        Some(url) if !index.no_index => {
            args.push("--index-url".to_string());
            args.push(url.to_string());
        }
        _ => args.push("--no-index".to_string()),
    }
    if let Some(find_links) = &index.find_links {
        args.push("--find-links".to_string());
        args.push(find_links.clone());
    }
    args
}

/// Requirement flags for pip; at least one spec or requirements file
pub fn selection_args(selection: &SelectionArgs, command: &str) -> Result<Vec<String>> {
    if selection.specs.is_empty() && selection.requirement.is_empty() {
        return Err(Error::user(format!(
            "You must give at least one requirement to {command} (see \"pipkin help {command}\")"
        )));
    }

    let mut args = Vec::new();
    for path in &selection.requirement {
        check_input_file(path, "requirements")?;
        args.push("-r".to_string());
        args.push(path.display().to_string());
    }
    for path in &selection.constraint {
        check_input_file(path, "constraints")?;
        args.push("-c".to_string());
        args.push(path.display().to_string());
    }
    if selection.no_deps {
        args.push("--no-deps".to_string());
    }
    if selection.pre {
        args.push("--pre".to_string());
    }
    args.extend(selection.specs.iter().cloned());
    Ok(args)
}

/// Requirement and constraint files are read by pip, but a missing one is
/// reported before any work starts
pub fn check_input_file(path: &Path, kind: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::user(format!(
            "Could not open {kind} file {}",
            path.display()
        )))
    }
}

/// `--exclude` flags for list and freeze, workspace distributions included
pub fn exclusion_args(extra: &[String]) -> Vec<String> {
    ALWAYS_EXCLUDED
        .iter()
        .map(|name| name.to_string())
        .chain(extra.iter().cloned())
        .flat_map(|name| ["--exclude".to_string(), name])
        .collect()
}
