// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: root of the system being upgraded
fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .global(true)
        .default_value("/")
        .help("Root of the system being upgraded")
}

fn debug_arg() -> Arg {
    Arg::new("debug")
        .long("debug")
        .global(true)
        .action(ArgAction::SetTrue)
        .help("Log debug output, including the package engine's")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

fn build_cli() -> Command {
    Command::new("system-upgrade")
        .version(env!("CARGO_PKG_VERSION"))
        .author("System Upgrade Contributors")
        .about("Offline major-version upgrade of an installed system")
        .arg(root_arg())
        .arg(debug_arg())
        .subcommand_required(true)
        .subcommand(
            Command::new("stage")
                .about("Stage downloaded packages and arm the upgrade boot")
                .arg(Arg::new("packages").num_args(0..).help("Package files to stage"))
                .arg(
                    Arg::new("media-package")
                        .long("media-package")
                        .value_name("PATH")
                        .action(ArgAction::Append)
                        .help("Package on the upgrade media, relative to the media root"),
                )
                .arg(
                    Arg::new("media-device")
                        .long("media-device")
                        .value_name("DEVICE")
                        .help("Device holding the upgrade media"),
                )
                .arg(
                    Arg::new("media-fstype")
                        .long("media-fstype")
                        .help("Filesystem type of the upgrade media"),
                )
                .arg(
                    Arg::new("media-options")
                        .long("media-options")
                        .help("Mount options for the upgrade media"),
                ),
        )
        .subcommand(
            Command::new("prep-boot")
                .about("Finish the upgrade initrd and add the upgrade boot entry")
                .arg(Arg::new("kernel").required(true).help("Kernel image to boot into the upgrade"))
                .arg(Arg::new("initrd").required(true).help("Initrd for the upgrade boot")),
        )
        .subcommand(
            Command::new("check")
                .about("Check the staged packages for conflicts and missing requirements")
                .arg(flag("test", "Also simulate the whole transaction")),
        )
        .subcommand(
            Command::new("install")
                .about("Install the staged packages (run from the upgrade boot)")
                .arg(flag("dry-run", "Go through the transaction without changing anything"))
                .arg(flag("no-progress", "Log progress instead of drawing a progress bar")),
        )
        .subcommand(Command::new("reset-boot").about("Remove the upgrade boot entry, restoring the previous default"))
        .subcommand(Command::new("remove-boot").about("Remove the upgrade boot entry and its kernel and initrd"))
        .subcommand(Command::new("cleanup").about("Remove everything the upgrade left behind"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("system-upgrade.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
