use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use log::{LevelFilter, debug, error, info};
use pybunch::{
    config::{CONFIG_FILE_NAME, Config},
    project::Project,
};

/// Pack a Python project into a single executable file
#[derive(Debug, Parser)]
#[command(name = "pybunch", version)]
struct Cli {
    /// Add a directory whose modules are bundled under their own names
    #[arg(short = 'd', long = "directory", value_name = "DIR")]
    directories: Vec<PathBuf>,

    /// Add a directory bundled as the package NAME
    #[arg(short = 'p', long = "package", value_name = "NAME=DIR", value_parser = parse_package)]
    packages: Vec<(String, PathBuf)>,

    /// Dotted name of the module (or package with a `__main__`) to run
    #[arg(short, long)]
    entrypoint: Option<String>,

    /// Include only modules statically imported from the entry point onwards
    #[arg(short, long)]
    statically_optimize: bool,

    /// Output path for the packed file; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Let bundled code import the internal prefix under an external name
    #[arg(long = "alias", value_name = "EXTERNAL=INTERNAL", value_parser = parse_alias)]
    aliases: Vec<(String, String)>,

    /// Print the modules reachable from the entry point instead of packing
    #[arg(long)]
    list_dependencies: bool,

    /// Configuration file; defaults to ./pybunch.toml, then the user config
    /// directory
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command-line values win over the file; list-valued flags extend it
    fn apply(&self, config: &mut Config) {
        config.directories.extend(self.directories.iter().cloned());
        config.packages.extend(self.packages.iter().cloned());
        config.aliases.extend(self.aliases.iter().cloned());
        if let Some(entrypoint) = &self.entrypoint {
            config.entrypoint = Some(entrypoint.clone());
        }
        if self.statically_optimize {
            config.statically_optimize = true;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
    }
}

fn split_assignment(arg: &str) -> Result<(&str, &str), String> {
    match arg.split_once('=') {
        Some((name, value)) if !value.contains('=') => Ok((name, value)),
        _ => Err(format!("expected exactly one `=` in `{arg}`")),
    }
}

fn parse_package(arg: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = split_assignment(arg)?;
    if name.is_empty() {
        return Err(format!("missing package name in `{arg}`"));
    }
    Ok((name.to_owned(), PathBuf::from(path)))
}

fn parse_alias(arg: &str) -> Result<(String, String), String> {
    let (external, internal) = split_assignment(arg)?;
    Ok((external.to_owned(), internal.to_owned()))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    debug!("Effective configuration: {config:?}");

    let aliases = config.alias_table()?;
    let Some(entrypoint) = config.entrypoint.as_deref() else {
        bail!("No entry point given; pass --entrypoint or set `entrypoint` in {CONFIG_FILE_NAME}");
    };
    let roots = config.source_roots();
    if roots.is_empty() {
        bail!("Nothing to bundle; pass --directory or --package");
    }

    let project = Project::discover(&roots, aliases)?;
    if project.modules().is_empty() {
        bail!("No Python modules found in the given directories");
    }

    let mut stdout = io::stdout().lock();
    if cli.list_dependencies {
        for module in project.dependencies(entrypoint)? {
            writeln!(stdout, "{module}")?;
        }
        return Ok(());
    }

    let packed = project.pack(entrypoint, config.statically_optimize)?;
    match &config.output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, packed)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => stdout.write_all(packed.as_bytes())?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_package() {
        assert_eq!(
            parse_package("vendor.lib=third_party/lib"),
            Ok(("vendor.lib".to_owned(), PathBuf::from("third_party/lib")))
        );
        assert!(parse_package("=lib").is_err());
        assert!(parse_package("lib").is_err());
        assert!(parse_package("a=b=c").is_err());
    }

    #[test]
    fn test_flags_extend_config() {
        let cli = Cli::parse_from([
            "pybunch", "-d", "src", "-e", "app", "--alias", "ext.app=app", "-vv",
        ]);
        let mut config = Config {
            directories: vec![PathBuf::from("lib")],
            entrypoint: Some("old".to_owned()),
            ..Default::default()
        };
        cli.apply(&mut config);
        assert_eq!(
            config.directories,
            vec![PathBuf::from("lib"), PathBuf::from("src")]
        );
        assert_eq!(config.entrypoint.as_deref(), Some("app"));
        assert_eq!(config.aliases.get("ext.app").map(String::as_str), Some("app"));
        assert_eq!(cli.verbose, 2);
    }
}
