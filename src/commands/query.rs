// src/commands/query.rs
//! Commands that inspect the target or fetch archives without changing it

use super::{Environment, exclusion_args, selection_args};
use crate::cli::{IndexArgs, ListFormat, SelectionArgs};
use crate::error::Result;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub outdated: bool,
    pub uptodate: bool,
    pub not_required: bool,
    pub pre: bool,
    pub format: ListFormat,
    pub exclude: Vec<String>,
}

impl ListOptions {
    /// Outdated and up-to-date checks consult the index
    pub fn needs_index(&self) -> bool {
        self.outdated || self.uptodate
    }
}

pub fn list_args(options: &ListOptions) -> Vec<String> {
    let mut args = vec!["list".to_string()];
    if options.outdated {
        args.push("--outdated".to_string());
    }
    if options.uptodate {
        args.push("--uptodate".to_string());
    }
    if options.not_required {
        args.push("--not-required".to_string());
    }
    if options.pre {
        args.push("--pre".to_string());
    }
    args.push("--format".to_string());
    args.push(
        match options.format {
            ListFormat::Columns => "columns",
            ListFormat::Freeze => "freeze",
            ListFormat::Json => "json",
        }
        .to_string(),
    );
    args.extend(exclusion_args(&options.exclude));
    args
}

/// Run pip against a mirror of the target and print its result
fn query(env: &Environment, args: &[String]) -> Result<()> {
    let output = env.with_session(|session| session.query(args))?;
    env.print_output(&output, true);
    Ok(())
}

pub fn cmd_list(env: &Environment, index: &IndexArgs, options: &ListOptions) -> Result<()> {
    let mut args = list_args(options);
    if options.needs_index() {
        let route = env.index_route(index)?;
        args.extend(route.args.iter().cloned());
        return query(env, &args);
    }
    query(env, &args)
}

pub fn cmd_show(env: &Environment, packages: &[String]) -> Result<()> {
    let mut args = vec!["show".to_string()];
    args.extend(packages.iter().cloned());
    query(env, &args)
}

pub fn cmd_freeze(env: &Environment, exclude: &[String]) -> Result<()> {
    let mut args = vec!["freeze".to_string()];
    args.extend(exclusion_args(exclude));
    query(env, &args)
}

pub fn cmd_check(env: &Environment) -> Result<()> {
    query(env, &["check".to_string()])
}

/// Download archives through the proxy into `dest`
pub fn cmd_download(
    env: &Environment,
    selection: &SelectionArgs,
    index: &IndexArgs,
    dest: &Path,
) -> Result<()> {
    let mut args = vec![
        "download".to_string(),
        "--dest".to_string(),
        absolute(dest)?,
    ];
    args.extend(selection_args(selection, "download")?);
    let route = env.index_route(index)?;
    args.extend(route.args.iter().cloned());
    query(env, &args)
}

/// Build wheels through the proxy into `wheel_dir`
pub fn cmd_wheel(
    env: &Environment,
    selection: &SelectionArgs,
    index: &IndexArgs,
    wheel_dir: &Path,
) -> Result<()> {
    let mut args = vec![
        "wheel".to_string(),
        "--wheel-dir".to_string(),
        absolute(wheel_dir)?,
    ];
    args.extend(selection_args(selection, "wheel")?);
    let route = env.index_route(index)?;
    args.extend(route.args.iter().cloned());
    query(env, &args)
}

fn absolute(path: &Path) -> Result<String> {
    Ok(std::path::absolute(path)?.display().to_string())
}
