use clap::{value_parser, Arg, ArgMatches, Command};
use patchbay_installer::{Installer, InstallerConfig};
use std::path::PathBuf;

fn cli() -> Command {
    let common = [
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("TOML file with app_dir / entry_point"),
        Arg::new("app-dir")
            .long("app-dir")
            .value_parser(value_parser!(PathBuf))
            .help("Directory the host application loads its code from"),
        Arg::new("entry")
            .long("entry")
            .value_parser(value_parser!(PathBuf))
            .help("Script the bootstrap stub requires"),
    ];

    Command::new("patchbay-installer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Install or remove the patchbay bootstrap stub")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("install")
                .about("Write the bootstrap stub")
                .args(common.clone()),
        )
        .subcommand(
            Command::new("remove")
                .about("Delete the bootstrap stub")
                .args(common.clone()),
        )
        .subcommand(
            Command::new("status")
                .about("Report whether the stub is in place")
                .args(common),
        )
}

/// File config first, then flags on top
fn load_config(args: &ArgMatches) -> anyhow::Result<InstallerConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => InstallerConfig::load(path)?,
        None => InstallerConfig::default(),
    };
    if let Some(app_dir) = args.get_one::<PathBuf>("app-dir") {
        config = config.with_app_dir(app_dir);
    }
    if let Some(entry) = args.get_one::<PathBuf>("entry") {
        config = config.with_entry_point(entry);
    }
    if config.entry_point.is_relative() {
        config.entry_point = std::env::current_dir()?.join(&config.entry_point);
    }
    Ok(config)
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("install", args)) => {
            let installer = Installer::new(load_config(args)?);
            let app_dir = installer.install()?;
            println!("Installed bootstrap stub in {}", app_dir.display());
        }
        Some(("remove", args)) => {
            let installer = Installer::new(load_config(args)?);
            installer.remove()?;
            println!("Removed bootstrap stub from {}", installer.config().app_dir.display());
        }
        Some(("status", args)) => {
            let installer = Installer::new(load_config(args)?);
            let status = installer.status();
            println!("{}: {status}", installer.config().app_dir.display());
        }
        _ => {}
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    if let Err(error) = run(&matches) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
