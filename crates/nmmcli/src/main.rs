use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nmmcore::activation::DeployMode;
use nmmcore::archive::ArchiveFileNode;
use nmmcore::manager::{ModInstallFormData, OperationStatus};
use nmmcore::progress::FileProgress;
use nmmcore::{ModManager, OperationResult};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nativemm", version, about = "nativepc mod manager")]
struct Cli {
    /// Config file (defaults to the user data directory)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show an archive's layout
    Preview {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
    /// Install an archive as a new mod
    Install {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        name: String,
        #[arg(long, value_name = "ID", default_value = "")]
        nexus_id: String,
        #[arg(long = "category", value_name = "NAME")]
        categories: Vec<String>,
    },
    /// Mods in load order
    List {
        #[arg(long)]
        json: bool,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    /// Change load order (0 applies first)
    Move {
        name: String,
        position: usize,
    },
    Delete {
        name: String,
    },
    /// Re-apply the load order
    Sync,
    /// Paths written by more than one mod
    Conflicts,
    SetGameDir {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    SetDeployMode {
        #[arg(value_enum)]
        mode: DeployModeArg,
    },
    Categories,
    CategoryAdd {
        name: String,
        #[arg(value_name = "#RRGGBB")]
        color: String,
    },
    CategoryRemove {
        name: String,
    },
    CategoryColor {
        name: String,
        #[arg(value_name = "#RRGGBB")]
        color: String,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum DeployModeArg {
    Copy,
    Hardlink,
}

impl From<DeployModeArg> for DeployMode {
    fn from(arg: DeployModeArg) -> Self {
        match arg {
            DeployModeArg::Copy => DeployMode::Copy,
            DeployModeArg::Hardlink => DeployMode::Hardlink,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut manager = match &cli.config {
        Some(path) => ModManager::open(path),
        None => ModManager::open_default(),
    }
    .context("Failed to open mod manager")?;

    run(&mut manager, cli.command)
}

fn run(manager: &mut ModManager, command: Command) -> Result<()> {
    let progress = |p: FileProgress| {
        if let Some(file) = &p.current_file {
            eprintln!("[{:>5.1}%] {}", p.percentage, file);
        }
    };

    match command {
        Command::Preview { archive } => {
            let preview = manager.preview_archive(&archive)?;
            if preview.has_native_pc {
                println!("nativepc root: {}", preview.native_pc_path);
            } else {
                println!("No nativepc directory; files go to the game root");
            }
            for node in &preview.files {
                print_node(node, 0);
            }
        }
        Command::Install {
            archive,
            name,
            nexus_id,
            categories,
        } => {
            let form = ModInstallFormData {
                name,
                nexus_id,
                categories,
            };
            let info = manager
                .install(&archive, &form, Some(&progress))
                .with_context(|| format!("Failed to install {}", archive.display()))?;
            println!(
                "Installed \"{}\": {} nativepc file(s), {} root file(s)",
                info.name,
                info.files.nativepc.len(),
                info.files.root.len()
            );
        }
        Command::List { json } => {
            let mods = manager.mods()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&mods)?);
                return Ok(());
            }
            for m in mods {
                let mark = match (m.enabled, m.applied) {
                    (true, true) => "[x]",
                    (false, false) => "[ ]",
                    _ => "[~]",
                };
                let conflict = if m.has_conflict {
                    format!("  conflicts with {}", m.conflict_with.join(", "))
                } else {
                    String::new()
                };
                println!("{:>3} {} {}{}", m.order, mark, m.name, conflict);
            }
        }
        Command::Enable { name } => report(manager.enable(&name, Some(&progress))?)?,
        Command::Disable { name } => report(manager.disable(&name, Some(&progress))?)?,
        Command::Move { name, position } => {
            report(manager.reorder(&name, position, Some(&progress))?)?
        }
        Command::Delete { name } => report(manager.delete(&name, Some(&progress))?)?,
        Command::Sync => report(manager.sync(Some(&progress))?)?,
        Command::Conflicts => {
            let resolution = manager.resolution();
            let mut any = false;
            for path in resolution.paths.values().filter(|p| p.is_conflict()) {
                any = true;
                println!(
                    "{}: {} (winner {})",
                    path.relative_path,
                    path.writers.join(" < "),
                    path.winner
                );
            }
            if !any {
                println!("No conflicts between enabled mods");
            }
        }
        Command::SetGameDir { path } => {
            report(manager.set_game_directory(&path, Some(&progress))?)?
        }
        Command::SetDeployMode { mode } => manager.set_deploy_mode(mode.into())?,
        Command::Categories => {
            for category in &manager.config().categories {
                println!("{} {}", category.color, category.name);
            }
        }
        Command::CategoryAdd { name, color } => manager.add_category(&name, &color)?,
        Command::CategoryRemove { name } => {
            if !manager.remove_category(&name)? {
                bail!("No category named {name:?}");
            }
        }
        Command::CategoryColor { name, color } => manager.recolor_category(&name, &color)?,
    }
    Ok(())
}

fn report(result: OperationResult) -> Result<()> {
    match result.status {
        OperationStatus::Success => {
            println!("{}", result.message.unwrap_or_default());
            Ok(())
        }
        OperationStatus::Partial => {
            println!("{}", result.message.unwrap_or_default());
            for failed in &result.failed {
                eprintln!("  failed: {failed}");
            }
            bail!("{} path(s) could not be updated", result.failed.len())
        }
        OperationStatus::Failure => {
            for failed in &result.failed {
                eprintln!("  failed: {failed}");
            }
            bail!("{}", result.error.unwrap_or_default())
        }
    }
}

fn print_node(node: &ArchiveFileNode, depth: usize) {
    let suffix = if node.is_directory { "/" } else { "" };
    println!("{}{}{}", "  ".repeat(depth), node.name, suffix);
    for child in node.children.iter().flatten() {
        print_node(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_options() {
        let cli = Cli::try_parse_from([
            "nativemm",
            "--config",
            "cfg.json",
            "install",
            "armor.zip",
            "Armor1",
            "--nexus-id",
            "55",
            "--category",
            "Armor",
            "--category",
            "Weapons",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.json")));
        let Command::Install {
            name,
            nexus_id,
            categories,
            ..
        } = cli.command
        else {
            panic!("expected install");
        };
        assert_eq!(name, "Armor1");
        assert_eq!(nexus_id, "55");
        assert_eq!(categories, vec!["Armor", "Weapons"]);
    }

    #[test]
    fn test_deploy_mode_values() {
        let cli = Cli::try_parse_from(["nativemm", "set-deploy-mode", "hardlink"]).unwrap();
        let Command::SetDeployMode { mode } = cli.command else {
            panic!("expected set-deploy-mode");
        };
        assert_eq!(DeployMode::from(mode), DeployMode::Hardlink);

        assert!(Cli::try_parse_from(["nativemm", "set-deploy-mode", "symlink"]).is_err());
        assert!(Cli::try_parse_from(["nativemm", "move", "A", "first"]).is_err());
    }
}
