//! nxbrowse
//!
//! Command line front end that browses, edits and installs packages onto
//! host directories emulating the device partitions.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use nxbrowse::browser::{Activation, BrowserView, Session};
use nxbrowse::config::{get_config, AppConfig};
use nxbrowse::fs::{format_size, join_path, Backing, Partition};
use nxbrowse::install::{InstallOutcome, InstallRequest, Installer};
use nxbrowse::platform::host::{host_platform, HostExplorers};
use nxbrowse::platform::Confirm;
use nxbrowse::ticket::CertificateChain;

#[derive(Parser)]
#[command(name = "nxbrowse", version, about = "Browse partitions and install packages")]
struct Cli {
    /// Configuration file (defaults to ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Accept every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Locations are `<target>:<path>`, e.g. `sd:/switch` or `remote:C:/games`
#[derive(Subcommand)]
enum Command {
    /// List a directory
    Ls { location: String },
    /// Recursive size of a directory or size of a file
    TreeSize { location: String },
    /// Free and total space of every partition
    Free,
    /// Install a package
    Install {
        location: String,
        /// Destination partition (prompted when omitted)
        #[arg(long)]
        to: Option<String>,
    },
    /// Install every package of a directory
    InstallAll { location: String },
    /// Import a ticket file
    ImportTicket { location: String },
    /// Show the contents of a NACP file
    Nacp { location: String },
    /// Show a file as text, or as hex with --hex
    View {
        location: String,
        #[arg(long)]
        hex: bool,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Delete a file or directory
    Rm { location: String },
    /// Rename an entry within its directory
    Mv { location: String, new_name: String },
    /// Copy a file or directory into a directory
    Cp { source: String, destination: String },
}

/// Parsed `<target>:<path>`
#[derive(Debug, PartialEq, Eq)]
struct Location {
    backing: Backing,
    /// Path relative to the target root
    path: String,
}

fn parse_location(location: &str) -> Result<Location, String> {
    let (target, rest) = location
        .split_once(':')
        .ok_or_else(|| format!("{} is not of the form <target>:<path>", location))?;

    if target.eq_ignore_ascii_case("remote") {
        let (mount, path) = rest
            .split_once(':')
            .ok_or_else(|| format!("{} is missing the remote drive (remote:C:/...)", location))?;
        return Ok(Location {
            backing: Backing::Remote(mount.to_string()),
            path: path.trim_matches('/').to_string(),
        });
    }

    let partition =
        Partition::from_short_name(target).ok_or_else(|| format!("Unknown target {}", target))?;
    Ok(Location {
        backing: Backing::Partition(partition),
        path: rest.trim_matches('/').to_string(),
    })
}

/// Prompts on stdin, or accepts everything with `--yes`
struct StdinConfirm {
    assume_yes: bool,
}

impl Confirm for StdinConfirm {
    fn confirm(&mut self, title: &str, message: &str, options: &[&str]) -> Option<usize> {
        if self.assume_yes {
            return Some(0);
        }
        println!("== {} ==\n{}", title, message);
        for (index, option) in options.iter().enumerate() {
            println!("  [{}] {}", index + 1, option);
        }
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let choice = line.trim().parse::<usize>().ok()?.checked_sub(1)?;
        // The last option is always the cancel entry
        (choice + 1 < options.len()).then_some(choice)
    }
}

/// Open a view on the directory holding `location`, returning the entry name
fn open_location(session: &Session, location: &str) -> Result<(BrowserView, String), Box<dyn Error>> {
    let location = parse_location(location)?;
    let mut view = BrowserView::open(session, &location.backing)?;
    if location.path.is_empty() {
        return Ok((view, String::new()));
    }
    let real = join_path(view.explorer().cursor().root(), &location.path);
    view.jump_to(&real)?;
    if view.selected_entry().map(|e| e.name.as_str()) != Some(nxbrowse::fs::get_file_name(&real)) {
        return Err(format!("{} does not exist", real).into());
    }
    Ok((view, nxbrowse::fs::get_file_name(&real).to_string()))
}

/// Open a view inside the directory `location`
fn open_directory(session: &Session, location: &str) -> Result<BrowserView, Box<dyn Error>> {
    let (mut view, name) = open_location(session, location)?;
    if !name.is_empty() {
        match view.activate(&name)? {
            Activation::Entered => {}
            Activation::File(info) => return Err(format!("{} is not a directory", info.presentable_path).into()),
        }
    }
    Ok(view)
}

fn report_install(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Installed(content) => println!(
            "Installed {} entries ({})",
            content.entries,
            format_size(content.bytes_written)
        ),
        InstallOutcome::InstalledWithoutRights { content, error } => {
            println!(
                "Installed {} entries ({}) without rights",
                content.entries,
                format_size(content.bytes_written)
            );
            warn!("Ticket import failed: {}", error);
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config: AppConfig = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => get_config().clone(),
    };
    let certificate_chain = match &config.ticket.certificate_chain {
        Some(path) => CertificateChain::load(path)?,
        None => {
            warn!("No certificate chain configured, ticket imports will be rejected");
            CertificateChain::default()
        }
    };

    let mut session = Session::new(
        host_platform(&config),
        certificate_chain,
        Box::new(HostExplorers::new(config.clone())),
        Box::new(StdinConfirm {
            assume_yes: cli.yes,
        }),
    );
    session.nacp_language = config.nacp.language;

    match cli.command {
        Command::Ls { location } => {
            let view = open_directory(&session, &location)?;
            println!("{}", view.explorer().presentable_cwd());
            if view.entries().is_empty() {
                println!("  (empty)");
            }
            for entry in view.entries() {
                let path = view.explorer().full_path_for(&entry.name);
                if entry.is_directory(view.explorer()) {
                    println!("  {}/", entry.name);
                } else {
                    let size = view.explorer().get_file_size(&path)?;
                    println!("  {:<40} {:>12}", entry.name, format_size(size));
                }
            }
        }
        Command::TreeSize { location } => {
            let (view, name) = open_location(&session, &location)?;
            let explorer = view.explorer();
            let path = if name.is_empty() {
                explorer.cwd().to_string()
            } else {
                explorer.full_path_for(&name)
            };
            let size = if explorer.is_directory(&path) {
                explorer.get_directory_size(&path)?
            } else {
                explorer.get_file_size(&path)?
            };
            println!("{}", format_size(size));
        }
        Command::Free => {
            for partition in Partition::ALL {
                let free = session.platform.space.free_space(partition)?;
                let total = session.platform.space.total_space(partition)?;
                println!(
                    "{:<14} {:>12} free of {:>12}",
                    partition.display_name(),
                    format_size(free),
                    format_size(total)
                );
            }
        }
        Command::Install { location, to } => {
            let (mut view, name) = open_location(&session, &location)?;
            let outcome = match to {
                Some(to) => {
                    let destination = Partition::from_short_name(&to)
                        .ok_or_else(|| format!("Unknown partition {}", to))?;
                    let request = InstallRequest::new(view.explorer().full_path_for(&name), destination);
                    Installer::new(&mut session.platform, &session.certificate_chain).start_install(
                        &request,
                        view.explorer(),
                        session.confirm.as_mut(),
                    )?
                }
                None => view.install(&mut session, &name)?,
            };
            report_install(&outcome);
        }
        Command::InstallAll { location } => {
            let (mut view, name) = open_location(&session, &location)?;
            let report = view.install_all(&mut session, &name)?;
            for (path, result) in &report.results {
                match result {
                    Ok(outcome) => {
                        print!("{}: ", path);
                        report_install(outcome);
                    }
                    Err(e) => println!("{}: failed: {}", path, e),
                }
            }
            println!("{} installed, {} failed", report.succeeded(), report.failed());
        }
        Command::ImportTicket { location } => {
            let (view, name) = open_location(&session, &location)?;
            view.import_ticket(&mut session, &name)?;
            println!("Ticket imported");
        }
        Command::Nacp { location } => {
            let (view, name) = open_location(&session, &location)?;
            println!("{}", view.view_nacp(&session, &name)?.summary());
        }
        Command::View { location, hex, offset } => {
            let (view, name) = open_location(&session, &location)?;
            if hex {
                for line in view.view_hex(&name, offset)? {
                    println!("{}", line);
                }
            } else {
                println!("{}", view.view_text(&name)?);
            }
        }
        Command::Rm { location } => {
            let (mut view, name) = open_location(&session, &location)?;
            view.delete(&mut session, &name)?;
            println!("Deleted {}", location);
        }
        Command::Mv { location, new_name } => {
            let (mut view, name) = open_location(&session, &location)?;
            if view.rename(&mut session, &name, &new_name)? {
                println!("Renamed {} to {}", name, new_name);
            }
        }
        Command::Cp { source, destination } => {
            let (from, name) = open_location(&session, &source)?;
            from.copy(&mut session, &name);
            let mut to = open_directory(&session, &destination)?;
            let copied = to.paste(&mut session)?;
            println!("Copied {}", format_size(copied));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
    info!("nxbrowse {}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
