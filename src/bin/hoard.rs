// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use hoard::{
    lock::{force_unlock, is_locked},
    registry, ArchiveKind, DesktopEntry, Frontend, InstallError, Layout, OpenOptions, OptionKey,
    OptionValue, Quiet, Store, StoreError, Terminal, UpdateStatus,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Exit code reserved for a database that could not be written.
const EXIT_DATABASE_UNWRITABLE: i32 = 3;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  hoard [options] <hoard-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Remove lock left behind by a crashed instance before running.
    #[arg(long, global = true)]
    pub force_unlock: bool,

    /// Show debug logs and output of external tools.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never prompt and never show progress.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, filter: &FilterHandle) -> Result<()> {
        let layout = Layout::from_env()?;

        if let Command::Unlock = self.command {
            let sentinel = layout.lock_file();
            if !is_locked(&sentinel) {
                info!("no lock at {:?}", sentinel.display());
            }
            force_unlock(sentinel)?;
            return Ok(());
        }

        if self.quiet {
            self.dispatch(layout, Quiet, filter)
        } else {
            let terminal = Terminal::new()?;
            terminal.set_message(self.command.label());
            self.dispatch(layout, terminal, filter)
        }
    }

    fn dispatch<F: Frontend + Clone>(
        self,
        layout: Layout,
        frontend: F,
        filter: &FilterHandle,
    ) -> Result<()> {
        let options = OpenOptions {
            force_unlock: self.force_unlock,
            repair: false,
            verbose: self.verbose,
        };

        let mut store = match self.command {
            Command::Init => {
                Store::create(layout, frontend, options)?.frontend().finish();
                info!("store is ready");
                return Ok(());
            }
            Command::Repair => return run_repair(layout, frontend, options),
            _ => Store::open(layout, frontend, options)?,
        };

        if store.read_option(OptionKey::Verbose).as_flag() {
            filter.modify(|filter| *filter = EnvFilter::new("debug"))?;
        }

        let result = match self.command {
            Command::Install(opts) => run_install(&mut store, opts),
            Command::Remove(opts) => run_remove(&mut store, opts),
            Command::List => run_list(&store),
            Command::Rename(opts) => run_rename(&mut store, opts),
            Command::Binlink(opts) => run_binlink(&mut store, opts),
            Command::Pathify(opts) => run_pathify(&mut store, opts),
            Command::Unpath(opts) => run_unpath(&mut store, opts),
            Command::Desktop(opts) => run_desktop(&mut store, opts),
            Command::Update(opts) => run_update(&mut store, opts),
            Command::UpdateAll => run_update_all(&mut store),
            Command::SetUpdateUrl(opts) => run_set_update_url(&mut store, opts),
            Command::SetScript(opts) => run_set_script(&mut store, opts),
            Command::Branch(opts) => run_branch(&mut store, opts),
            Command::Config(opts) => run_config(&mut store, opts),
            Command::Erase(opts) => return run_erase(store, opts),
            Command::Init | Command::Repair | Command::Unlock => Ok(()),
        };
        store.frontend().finish();

        result
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create a new empty store.
    #[command(override_usage = "hoard init [options]")]
    Init,

    /// Install program from archive, file, directory, or URL.
    #[command(override_usage = "hoard install [options] <source>")]
    Install(InstallOptions),

    /// Uninstall programs.
    #[command(override_usage = "hoard remove [options] <program>...")]
    Remove(RemoveOptions),

    /// List installed programs.
    #[command(override_usage = "hoard list [options]")]
    List,

    /// Rename installed program.
    #[command(override_usage = "hoard rename [options] <program> <new_name>")]
    Rename(RenameOptions),

    /// Expose file of program as shell command.
    #[command(override_usage = "hoard binlink [options] <program> <file>")]
    Binlink(BinlinkOptions),

    /// Add program directory to PATH.
    #[command(override_usage = "hoard pathify [options] <program>")]
    Pathify(ProgramOptions),

    /// Remove PATH entry and binlinks of program.
    #[command(override_usage = "hoard unpath [options] <program>")]
    Unpath(ProgramOptions),

    /// Manage desktop entries of program.
    #[command(subcommand)]
    Desktop(DesktopCommand),

    /// Update program.
    #[command(override_usage = "hoard update [options] <program>")]
    Update(ProgramOptions),

    /// Update every program that can be updated.
    #[command(override_usage = "hoard update-all [options]")]
    UpdateAll,

    /// Set or clear remote archive that program updates from.
    #[command(override_usage = "hoard set-update-url [options] <program> [<url>]")]
    SetUpdateUrl(SetUpdateUrlOptions),

    /// Set or wipe script run after program updates.
    #[command(override_usage = "hoard set-script [options] <program> [<script>]")]
    SetScript(SetScriptOptions),

    /// Check out branch of git program.
    #[command(override_usage = "hoard branch [options] <program> <branch>")]
    Branch(BranchOptions),

    /// Read and change options.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Rebuild database from what is on disk.
    #[command(override_usage = "hoard repair [options]")]
    Repair,

    /// Remove every program and the store itself.
    #[command(override_usage = "hoard erase [options]")]
    Erase(EraseOptions),

    /// Remove lock left behind by a crashed instance.
    #[command(override_usage = "hoard unlock [options]")]
    Unlock,
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Self::Init => "initializing",
            Self::Install(_) => "installing",
            Self::Remove(_) => "removing",
            Self::List => "listing",
            Self::Rename(_) => "renaming",
            Self::Binlink(_) | Self::Pathify(_) | Self::Unpath(_) => "editing shell files",
            Self::Desktop(_) => "editing desktop entries",
            Self::Update(_) | Self::UpdateAll => "updating",
            Self::SetUpdateUrl(_) | Self::SetScript(_) | Self::Config(_) => "configuring",
            Self::Branch(_) => "changing branch",
            Self::Repair => "repairing",
            Self::Erase(_) => "erasing",
            Self::Unlock => "unlocking",
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ProgramOptions {
    /// Name of installed program.
    #[arg(value_name = "program")]
    pub program: String,
}

#[derive(Args, Clone, Debug)]
struct InstallOptions {
    /// Archive, file, directory, or URL to install from.
    #[arg(value_name = "source")]
    pub source: String,

    /// Name to install program under instead of the derived one.
    #[arg(short, long, value_name = "name")]
    pub name: Option<String>,

    /// Merge over program of the same name if it exists.
    #[arg(short, long, group = "collision")]
    pub overwrite: bool,

    /// Uninstall program of the same name first if it exists.
    #[arg(short, long, group = "collision")]
    pub reinstall: bool,
}

#[derive(Args, Clone, Debug)]
struct RemoveOptions {
    /// Names of programs to uninstall.
    #[arg(required = true, value_name = "program")]
    pub programs: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct RenameOptions {
    #[arg(value_name = "program")]
    pub program: String,

    #[arg(value_name = "new_name")]
    pub new_name: String,
}

#[derive(Args, Clone, Debug)]
struct BinlinkOptions {
    #[arg(value_name = "program")]
    pub program: String,

    /// File inside program directory to expose.
    #[arg(value_name = "file")]
    pub file: String,
}

#[derive(Debug, Clone, Subcommand)]
enum DesktopCommand {
    /// Create desktop entry for file of program.
    #[command(override_usage = "hoard desktop create [options] <program> <file>")]
    Create(DesktopCreateOptions),

    /// Remove desktop entry of program.
    #[command(override_usage = "hoard desktop remove [options] <program> <id>")]
    Remove(DesktopRemoveOptions),
}

#[derive(Args, Clone, Debug)]
struct DesktopCreateOptions {
    #[arg(value_name = "program")]
    pub program: String,

    /// File inside program directory to launch.
    #[arg(value_name = "file")]
    pub file: String,

    /// Display name in the menu, defaults to the program name.
    #[arg(long, value_name = "name")]
    pub name: Option<String>,

    #[arg(long, value_name = "comment")]
    pub comment: Option<String>,

    #[arg(long, value_name = "icon")]
    pub icon: Option<String>,

    /// Launch inside a terminal.
    #[arg(long)]
    pub terminal: bool,

    /// Menu category, may be given more than once.
    #[arg(long = "category", value_name = "category")]
    pub categories: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct DesktopRemoveOptions {
    #[arg(value_name = "program")]
    pub program: String,

    /// Identifier of desktop entry, as in `<file>-<program>`.
    #[arg(value_name = "id")]
    pub id: String,
}

#[derive(Args, Clone, Debug)]
struct SetUpdateUrlOptions {
    #[arg(value_name = "program")]
    pub program: String,

    /// URL of archive to download on update, clears it when absent.
    #[arg(value_name = "url")]
    pub url: Option<String>,

    /// Archive kind, taken from the URL when absent.
    #[arg(short, long, value_name = "extension")]
    pub kind: Option<ArchiveKind>,
}

#[derive(Args, Clone, Debug)]
struct SetScriptOptions {
    #[arg(value_name = "program")]
    pub program: String,

    /// Script to run after updates, wiped when absent.
    #[arg(value_name = "script")]
    pub script: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct BranchOptions {
    #[arg(value_name = "program")]
    pub program: String,

    #[arg(value_name = "branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Show value of option.
    Get { key: OptionKey },

    /// Flip flag option.
    Flip { key: OptionKey },

    /// Set option to value.
    Set { key: OptionKey, value: OptionValue },
}

#[derive(Args, Clone, Debug)]
struct EraseOptions {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

fn main() {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    if let Err(error) = cli.run(&handle) {
        let dump = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<registry::Error>())
            .and_then(registry::Error::unwritable_dump);
        if let Some(dump) = dump {
            println!("{dump}");
            error!("{error:?}");
            exit(EXIT_DATABASE_UNWRITABLE);
        }

        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_repair<F: Frontend + Clone>(layout: Layout, frontend: F, options: OpenOptions) -> Result<()> {
    match Store::open(layout.clone(), frontend.clone(), options) {
        Ok(mut store) => {
            store.repair()?;
            store.frontend().finish();
        }
        Err(StoreError::DatabaseBroken { .. }) => {
            let options = OpenOptions {
                repair: true,
                ..options
            };
            Store::open(layout, frontend, options)?.frontend().finish();
        }
        Err(err) => return Err(err.into()),
    }
    info!("database rebuilt from disk");

    Ok(())
}

fn run_install<F: Frontend>(store: &mut Store<F>, opts: InstallOptions) -> Result<()> {
    let decision = match (opts.overwrite, opts.reinstall) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };

    let name = match store.install(&opts.source, opts.name.as_deref(), decision) {
        Err(InstallError::AlreadyExists(name)) if decision.is_none() => {
            if store.read_option(OptionKey::SkipQuestions).as_flag() {
                return Err(InstallError::AlreadyExists(name).into());
            }

            let merge = "merge over it";
            let reinstall = "uninstall it first";
            let cancel = "cancel";
            let answer = store.frontend().choose(
                &format!("{name} is already installed, what should happen to it?"),
                &[merge, reinstall, cancel],
            );
            let decision = match answer.as_str() {
                answer if answer == merge => true,
                answer if answer == reinstall => false,
                _ => {
                    warn!("left {name} alone");
                    return Ok(());
                }
            };
            store.install(&opts.source, Some(&name), Some(decision))?
        }
        other => other?,
    };
    info!("installed {name}");

    Ok(())
}

fn run_remove<F: Frontend>(store: &mut Store<F>, opts: RemoveOptions) -> Result<()> {
    for program in opts.programs {
        store.uninstall(&program)?;
    }

    Ok(())
}

fn run_list<F: Frontend>(store: &Store<F>) -> Result<()> {
    store.frontend().finish();
    let programs = store.list_programs();
    if programs.is_empty() {
        info!("no programs installed");
    }
    for program in programs {
        println!("{program}");
    }

    Ok(())
}

fn run_rename<F: Frontend>(store: &mut Store<F>, opts: RenameOptions) -> Result<()> {
    match store.rename(&opts.program, &opts.new_name)? {
        hoard::Renamed::Renamed => info!("renamed {} to {}", opts.program, opts.new_name),
        hoard::Renamed::NameTaken => warn!("{} is already taken", opts.new_name),
    }

    Ok(())
}

fn run_binlink<F: Frontend>(store: &mut Store<F>, opts: BinlinkOptions) -> Result<()> {
    if store.add_binlink(&opts.program, &opts.file)? == hoard::Added::AlreadyThere {
        warn!("{} is already binlinked", opts.file);
    }

    Ok(())
}

fn run_pathify<F: Frontend>(store: &mut Store<F>, opts: ProgramOptions) -> Result<()> {
    if store.pathify(&opts.program)? == hoard::Added::AlreadyThere {
        warn!("{} is already in PATH", opts.program);
    }

    Ok(())
}

fn run_unpath<F: Frontend>(store: &mut Store<F>, opts: ProgramOptions) -> Result<()> {
    if store.remove_paths_and_binlinks(&opts.program)? == hoard::Removed::NoneExist {
        warn!("{} has no PATH entry or binlinks", opts.program);
    }

    Ok(())
}

fn run_desktop<F: Frontend>(store: &mut Store<F>, opts: DesktopCommand) -> Result<()> {
    match opts {
        DesktopCommand::Create(opts) => {
            let name = opts.name.unwrap_or_else(|| opts.program.clone());
            let mut entry = DesktopEntry::new(name, opts.file);
            entry.comment = opts.comment;
            entry.icon = opts.icon;
            entry.terminal = opts.terminal;
            entry.categories = opts.categories;

            if store.create_desktop(&opts.program, &entry)? == hoard::DesktopCreated::AlreadyExists {
                warn!("desktop entry {} already exists", entry.id(&opts.program));
            }
        }
        DesktopCommand::Remove(opts) => store.remove_desktop(&opts.program, &opts.id)?,
    }

    Ok(())
}

fn run_update<F: Frontend>(store: &mut Store<F>, opts: ProgramOptions) -> Result<()> {
    let status = store.update(&opts.program)?;
    report_update(&opts.program, status);

    Ok(())
}

fn run_update_all<F: Frontend>(store: &mut Store<F>) -> Result<()> {
    for (program, status) in store.update_all()? {
        match status {
            Ok(status) => report_update(&program, status),
            Err(err) => error!("{program}: {:?}", anyhow::Error::from(err)),
        }
    }

    Ok(())
}

fn report_update(program: &str, status: UpdateStatus) {
    match status {
        UpdateStatus::Success => info!("{program}: updated"),
        UpdateStatus::NoUpdate => info!("{program}: already up to date"),
        UpdateStatus::DoesNotUpdate => info!("{program}: nothing to update from"),
    }
}

fn run_set_update_url<F: Frontend>(store: &mut Store<F>, opts: SetUpdateUrlOptions) -> Result<()> {
    match opts.url {
        Some(url) => store.set_update_url(&opts.program, &url, opts.kind)?,
        None => {
            store.clear_update_url(&opts.program)?;
            info!("{} no longer updates from a URL", opts.program);
        }
    }

    Ok(())
}

fn run_set_script<F: Frontend>(store: &mut Store<F>, opts: SetScriptOptions) -> Result<()> {
    let script = opts.script.unwrap_or_default();
    store.set_post_upgrade_script(&opts.program, &script)?;

    Ok(())
}

fn run_branch<F: Frontend>(store: &mut Store<F>, opts: BranchOptions) -> Result<()> {
    store.change_git_branch(&opts.program, &opts.branch)?;

    Ok(())
}

fn run_config<F: Frontend>(store: &mut Store<F>, opts: ConfigCommand) -> Result<()> {
    match opts {
        ConfigCommand::Get { key } => {
            store.frontend().finish();
            println!("{key} = {}", store.read_option(key));
        }
        ConfigCommand::Flip { key } => {
            let flipped = store.flip_option(key)?;
            info!("{key} is now {flipped}");
        }
        ConfigCommand::Set { key, value } => {
            store.set_option(key, value)?;
            info!("{key} is now {}", store.read_option(key));
        }
    }

    Ok(())
}

fn run_erase<F: Frontend>(store: Store<F>, opts: EraseOptions) -> Result<()> {
    if !opts.yes {
        let answer = store
            .frontend()
            .choose("Remove every program and the store itself?", &["no", "yes"]);
        if answer != "yes" {
            warn!("erase cancelled");
            return Ok(());
        }
    }

    store.erase()?;
    Ok(())
}
