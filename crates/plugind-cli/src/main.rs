use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::{ColoredString, Colorize};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use plugind_core::config::Config;
use plugind_core::plugin::CATALOG_FILE;
use plugind_core::{
    load_catalog, Plugin, PluginError, PluginLifecycleService, PluginStatus,
    PluginStatusChangeEvent, Result, Subscription,
};

mod args;
use args::{Cli, Commands, ConfigAction, Shell};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let base_dir = resolve_base_dir(cli.base_dir);
    let catalog = cli
        .catalog
        .unwrap_or_else(|| base_dir.join(CATALOG_FILE));

    let result = match cli.command {
        Some(Commands::Config { action }) => handle_config(action, &base_dir),
        Some(Commands::Completions { shell }) => {
            handle_completions(shell);
            Ok(())
        }
        Some(command) => run_with_service(command, &base_dir, &catalog),
        None => {
            Cli::command().print_help().ok();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "warn"
    } else if verbose {
        "plugind=debug,plugind_core=debug"
    } else {
        "plugind=info,plugind_core=info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn resolve_base_dir(cli_base: Option<PathBuf>) -> PathBuf {
    if let Some(base) = cli_base {
        return base;
    }

    if let Ok(base) = std::env::var("PLUGIND_BASE") {
        return PathBuf::from(base);
    }

    Config::default_base_dir().unwrap_or_else(|_| PathBuf::from(".plugind"))
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "plugind", &mut io::stdout());
}

fn handle_config(action: ConfigAction, base_dir: &Path) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load(base_dir)?;
            match config.get(&key) {
                Some(value) => {
                    println!("{}", value);
                }
                None => {
                    return Err(PluginError::ConfigKeyNotFound { key });
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(base_dir)?;
            config.set(&key, &value)?;
            config.save(base_dir)?;
            println!("{} {} = {}", "Set:".green(), key, value);
        }
        ConfigAction::List => {
            let config = Config::load(base_dir)?;
            println!();
            for (key, value) in config.list() {
                println!("{} = {}", key.cyan(), value);
            }
            println!();
        }
        ConfigAction::Path => {
            let path = Config::path(base_dir);
            println!("{}", path.display());
        }
        ConfigAction::Init => {
            let path = Config::init(base_dir)?;
            println!("{} {}", "Initialized:".green(), path.display());
        }
    }

    Ok(())
}

fn run_with_service(command: Commands, base_dir: &Path, catalog: &Path) -> Result<()> {
    let runtime = Runtime::new()?;
    let config = Config::load(base_dir)?;
    let entries = load_catalog(catalog)?;
    debug!(
        base_dir = %base_dir.display(),
        catalog = %catalog.display(),
        plugins = entries.len(),
        "opening plugin service"
    );
    let service = config.open_service(base_dir, entries, runtime.handle().clone())?;

    match command {
        Commands::List => handle_list(&service),
        Commands::Show { name } => handle_show(&service, &name),
        Commands::Install { name, follow } => {
            if follow {
                handle_install_follow(&service, &runtime, &name)
            } else {
                handle_install(&service, &name)
            }
        }
        Commands::InstallAll => handle_install_all(&service, &runtime),
        Commands::Stop { name } => {
            let plugin = service.stop(&name)?;
            println!(
                "{} {} (status {})",
                "Stop requested:".yellow(),
                plugin.name,
                colored_status(plugin.status)
            );
            Ok(())
        }
        Commands::Reset { name } => {
            let plugin = service.reset(&name)?;
            println!("{} {}", "Reset:".green(), plugin.name);
            Ok(())
        }
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn colored_status(status: PluginStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        PluginStatus::Pending => text.dimmed(),
        PluginStatus::Installing => text.yellow(),
        PluginStatus::Installed => text.green(),
        PluginStatus::Error => text.red(),
    }
}

fn handle_list(service: &PluginLifecycleService) -> Result<()> {
    let plugins = service.list();
    if plugins.is_empty() {
        println!("No plugins in catalog.");
        return Ok(());
    }

    println!();
    for plugin in plugins {
        println!(
            "  {:<24} {:<12} {:<12} {}",
            plugin.name.bold(),
            colored_status(plugin.status),
            plugin.tag.as_deref().unwrap_or("-"),
            plugin.details.dimmed()
        );
    }
    println!();
    Ok(())
}

fn handle_show(service: &PluginLifecycleService, name: &str) -> Result<()> {
    let plugin = service.find(name)?;

    println!();
    println!("{}", plugin.name.bold());
    println!("  Status:    {}", colored_status(plugin.status));
    println!("  Tag:       {}", plugin.tag.as_deref().unwrap_or("-"));
    println!("  Source:    {}", plugin.details);
    println!(
        "  Workspace: {}",
        service.engine().workspace_path(&plugin.name).display()
    );
    println!(
        "  Mirror:    {}",
        service.engine().mirror_path(&plugin.name).display()
    );
    if plugin.stopped {
        println!("  {}", "Stop requested".yellow());
    }
    println!();
    Ok(())
}

fn print_installed(plugin: &Plugin) {
    println!(
        "{} {} @ {}",
        "Installed:".green(),
        plugin.name,
        plugin.tag.as_deref().unwrap_or("-")
    );
}

fn handle_install(service: &PluginLifecycleService, name: &str) -> Result<()> {
    let plugin = service.find(name)?;
    println!("Installing {} from {} ...", name, plugin.details.cyan());

    let plugin = service.exec_install_or_update(&plugin)?;
    print_installed(&plugin);
    Ok(())
}

fn print_event(event: &PluginStatusChangeEvent) {
    println!(
        "  {} {} {}",
        event.timestamp.format("%H:%M:%S").to_string().dimmed(),
        event.plugin_name,
        colored_status(event.status)
    );
}

/// Print events until no name in `waiting` has an install running. Ctrl-C stops them.
fn follow(
    service: &PluginLifecycleService,
    runtime: &Runtime,
    mut sub: Subscription,
    mut waiting: HashSet<String>,
) -> Result<()> {
    runtime.block_on(async {
        let mut stop_sent = false;
        while !waiting.is_empty() {
            tokio::select! {
                event = sub.recv() => {
                    let Some(event) = event else { break };
                    print_event(&event);
                    if event.status != PluginStatus::Installing
                        || !service.is_installing(&event.plugin_name)
                    {
                        waiting.remove(&event.plugin_name);
                    }
                }
                _ = tokio::signal::ctrl_c(), if !stop_sent => {
                    stop_sent = true;
                    println!("{}", "Stopping after the current git operation...".yellow());
                    for name in &waiting {
                        service.stop(name)?;
                    }
                }
            }
        }
        Ok::<(), PluginError>(())
    })
}

fn handle_install_follow(
    service: &PluginLifecycleService,
    runtime: &Runtime,
    name: &str,
) -> Result<()> {
    let sub = service.subscribe();
    service.install(name)?;

    follow(service, runtime, sub, HashSet::from([name.to_string()]))?;

    let plugin = service.find(name)?;
    match plugin.status {
        PluginStatus::Installed => print_installed(&plugin),
        PluginStatus::Error => println!("{} {}", "Failed:".red(), plugin.name),
        _ => println!("{} {}", "Cancelled:".yellow(), plugin.name),
    }
    Ok(())
}

fn handle_install_all(service: &PluginLifecycleService, runtime: &Runtime) -> Result<()> {
    let sub = service.subscribe();
    let mut waiting = HashSet::new();

    for plugin in service.list() {
        match service.install(&plugin.name) {
            Ok(()) => {
                waiting.insert(plugin.name);
            }
            Err(e @ PluginError::AlreadyInstalling { .. }) => {
                println!("  {} {}", "Skipped:".yellow(), e);
            }
            Err(e) => return Err(e),
        }
    }

    follow(service, runtime, sub, waiting)?;

    let plugins = service.list();
    let installed = plugins
        .iter()
        .filter(|p| p.status == PluginStatus::Installed)
        .count();
    let failed = plugins
        .iter()
        .filter(|p| p.status == PluginStatus::Error)
        .count();

    println!();
    println!("  Installed: {}", installed.to_string().green());
    if failed > 0 {
        println!("  Failed:    {}", failed.to_string().red());
    }
    Ok(())
}
