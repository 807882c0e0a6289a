// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn index_args() -> Vec<Arg> {
    vec![
        Arg::new("index_url")
            .short('i')
            .long("index-url")
            .value_name("URL")
            .help("Base URL of the Python Package Index"),
        Arg::new("extra_index_url")
            .long("extra-index-url")
            .value_name("URL")
            .action(ArgAction::Append)
            .help("Extra index URLs to use in addition to --index-url"),
        Arg::new("no_index")
            .long("no-index")
            .action(ArgAction::SetTrue)
            .help("Ignore package index, only look at --find-links"),
        Arg::new("no_mp_org")
            .long("no-mp-org")
            .action(ArgAction::SetTrue)
            .help("Don't consult micropython.org before PyPI"),
        Arg::new("find_links")
            .short('f')
            .long("find-links")
            .value_name("URL")
            .help("Directory or HTML page with links to archives"),
    ]
}

fn selection_args() -> Vec<Arg> {
    vec![
        Arg::new("spec")
            .action(ArgAction::Append)
            .help("Package specifications"),
        Arg::new("requirement")
            .short('r')
            .long("requirement")
            .value_name("FILE")
            .action(ArgAction::Append)
            .help("Install from the given requirements file"),
        Arg::new("constraint")
            .short('c')
            .long("constraint")
            .value_name("FILE")
            .action(ArgAction::Append)
            .help("Constrain versions using the given constraints file"),
        Arg::new("no_deps")
            .long("no-deps")
            .action(ArgAction::SetTrue)
            .help("Don't install package dependencies"),
        Arg::new("pre")
            .long("pre")
            .action(ArgAction::SetTrue)
            .help("Include pre-release and development versions"),
    ]
}

fn exclude_arg() -> Arg {
    Arg::new("exclude")
        .long("exclude")
        .value_name("NAME")
        .action(ArgAction::Append)
        .help("Exclude the given distribution from the output")
}

fn build_cli() -> Command {
    Command::new("pipkin")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Pipkin Contributors")
        .about("Install MicroPython and CircuitPython packages onto boards and directories")
        .arg(Arg::new("port").short('p').long("port").value_name("PORT").global(true).help("Serial port of a board running MicroPython"))
        .arg(Arg::new("mount").short('m').long("mount").value_name("PATH").global(true).help("Mount point of a CircuitPython volume"))
        .arg(Arg::new("dir").long("dir").value_name("PATH").global(true).help("Local directory standing in for the board's filesystem"))
        .arg(Arg::new("verbose").short('v').long("verbose").action(ArgAction::SetTrue).global(true).help("Show more details about the process"))
        .arg(Arg::new("quiet").short('q').long("quiet").action(ArgAction::SetTrue).global(true).help("Show less details about the process"))
        .arg(Arg::new("config").long("config").value_name("FILE").global(true).help("Configuration file"))
        .subcommand(
            Command::new("install")
                .about("Install packages")
                .args(selection_args())
                .args(index_args())
                .arg(Arg::new("upgrade").short('U').long("upgrade").action(ArgAction::SetTrue).help("Upgrade all given packages to the newest available version"))
                .arg(
                    Arg::new("upgrade_strategy")
                        .long("upgrade-strategy")
                        .value_parser(["only-if-needed", "eager"])
                        .default_value("only-if-needed")
                        .help("How dependencies are handled when upgrading"),
                )
                .arg(Arg::new("force_reinstall").long("force-reinstall").action(ArgAction::SetTrue).help("Reinstall all packages even if they are up to date"))
                .arg(Arg::new("compile").long("compile").action(ArgAction::SetTrue).help("Compile sources to .mpy before copying them to the target"))
                .arg(Arg::new("mpy_cross").long("mpy-cross").value_name("PATH").help("mpy-cross executable used with --compile")),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Uninstall packages")
                .arg(Arg::new("name").action(ArgAction::Append).help("Names of the distributions to remove"))
                .arg(Arg::new("requirement").short('r').long("requirement").value_name("FILE").action(ArgAction::Append).help("Uninstall all packages listed in the given requirements file"))
                .arg(Arg::new("yes").short('y').long("yes").action(ArgAction::SetTrue).help("Don't ask for confirmation")),
        )
        .subcommand(
            Command::new("list")
                .about("List installed packages")
                .args(index_args())
                .arg(Arg::new("outdated").short('o').long("outdated").action(ArgAction::SetTrue).help("List outdated packages"))
                .arg(Arg::new("uptodate").short('u').long("uptodate").action(ArgAction::SetTrue).help("List up to date packages"))
                .arg(Arg::new("not_required").long("not-required").action(ArgAction::SetTrue).help("List packages that are not dependencies of installed packages"))
                .arg(Arg::new("pre").long("pre").action(ArgAction::SetTrue).help("Include pre-release and development versions"))
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_parser(["columns", "freeze", "json"])
                        .default_value("columns")
                        .help("Output format"),
                )
                .arg(exclude_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Show information about installed packages")
                .arg(Arg::new("name").required(true).action(ArgAction::Append)),
        )
        .subcommand(
            Command::new("freeze")
                .about("Output installed packages in requirements format")
                .arg(exclude_arg()),
        )
        .subcommand(Command::new("check").about("Verify installed packages have compatible dependencies"))
        .subcommand(
            Command::new("download")
                .about("Download packages")
                .args(selection_args())
                .args(index_args())
                .arg(Arg::new("dest").short('d').long("dest").value_name("DIR").default_value(".").help("Directory for downloaded archives")),
        )
        .subcommand(
            Command::new("wheel")
                .about("Build wheels from requirements")
                .args(selection_args())
                .args(index_args())
                .arg(Arg::new("wheel_dir").short('w').long("wheel-dir").value_name("DIR").default_value(".").help("Directory for built wheels")),
        )
        .subcommand(
            Command::new("cache")
                .about("Inspect and manage pipkin's cache")
                .arg(
                    Arg::new("action")
                        .required(true)
                        .value_parser(["dir", "info", "list", "purge"]),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

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

    let man_path = man_dir.join("pipkin.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
