mod commands;

use clap::{Args, Parser, Subcommand};
use commands::{exit_code_for, DeployOptions, TopologyOptions};
use dbsandbox_schema::{Defaults, Flavor, TopologyKind};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dbsandbox",
    version,
    about = "Local MySQL-family sandboxes and replication topologies"
)]
struct Cli {
    /// TOML file overriding the built-in defaults.
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,

    /// How scripts are run: "shell" spawns them, "mock" only records them.
    #[arg(long, default_value = "shell", global = true)]
    runner: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy a single sandbox or a topology.
    #[command(subcommand)]
    Deploy(DeployCommand),
    /// List deployed sandboxes.
    List {
        /// Also report catalog entries that disagree with their description.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Stop and remove a sandbox or topology.
    Delete {
        /// Directory name under the sandbox home, or an absolute path.
        sandbox: String,
    },
    /// Remove an unpacked server tree that no sandbox uses.
    DeleteBinaries {
        /// Version directory under the binary directory.
        version: String,
    },
    /// Show the feature table for a flavor, optionally at one version.
    Capabilities {
        #[arg(long, default_value = "mysql")]
        flavor: Flavor,
        /// Only list features available at this version.
        #[arg(long)]
        version: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum DeployCommand {
    /// Deploy one sandbox.
    Single {
        #[command(flatten)]
        common: CommonArgs,
        /// Listening port; by default the first free port from the version's own.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Deploy a replication or cluster topology.
    Replication {
        #[command(flatten)]
        common: CommonArgs,
        /// master-slave, group, fan-in, all-masters, ndb, pxc or multiple.
        #[arg(long, default_value = "master-slave")]
        topology: TopologyKind,
        /// Node count (SQL nodes for ndb).
        #[arg(long, default_value_t = 3)]
        nodes: u32,
        /// NDB data nodes.
        #[arg(long)]
        ndb_nodes: Option<u32>,
        #[arg(long, default_value_t = false)]
        single_primary: bool,
        #[arg(long, default_value_t = false)]
        semisync: bool,
        /// Fan-in masters, e.g. "1,2".
        #[arg(long)]
        master_list: Option<String>,
        /// Fan-in slaves, e.g. "3".
        #[arg(long)]
        slave_list: Option<String>,
        #[arg(long, default_value_t = false, conflicts_with = "super_read_only")]
        read_only: bool,
        #[arg(long, default_value_t = false)]
        super_read_only: bool,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Server version, e.g. 8.0.30.
    version: String,
    #[arg(long, default_value = "mysql")]
    flavor: Flavor,
    /// Server tree; defaults to <binary dir>/<version>.
    #[arg(long)]
    basedir: Option<PathBuf>,
    /// Sandbox directory name.
    #[arg(long)]
    name: Option<String>,
    /// Replace an existing sandbox with the same directory.
    #[arg(long, default_value_t = false)]
    force: bool,
    #[arg(long, default_value_t = false)]
    skip_start: bool,
    #[arg(long, default_value_t = false)]
    skip_load_grants: bool,
    #[arg(long, default_value_t = false)]
    gtid: bool,
    #[arg(long, default_value_t = false)]
    keep_server_uuid: bool,
    #[arg(long, default_value_t = false)]
    disable_mysqlx: bool,
    #[arg(long, default_value_t = false)]
    enable_admin_address: bool,
    #[arg(long, default_value_t = false)]
    native_auth_plugin: bool,
    /// Run node commands in concurrent waves.
    #[arg(long, default_value_t = false)]
    concurrent: bool,
    /// Extra my.cnf option (repeatable).
    #[arg(long = "my-cnf-option")]
    my_cnf_options: Vec<String>,
    /// Extra server initialization option (repeatable).
    #[arg(long = "init-option")]
    init_options: Vec<String>,
}

impl CommonArgs {
    fn into_options(self) -> DeployOptions {
        DeployOptions {
            version: self.version,
            flavor: self.flavor,
            basedir: self.basedir,
            name: self.name,
            force: self.force,
            skip_start: self.skip_start,
            load_grants: !self.skip_load_grants,
            gtid: self.gtid,
            keep_uuid: self.keep_server_uuid,
            disable_mysqlx: self.disable_mysqlx,
            enable_admin_address: self.enable_admin_address,
            native_auth_plugin: self.native_auth_plugin,
            concurrent: self.concurrent,
            my_cnf_options: self.my_cnf_options,
            init_options: self.init_options,
        }
    }
}

fn load_defaults(path: Option<&PathBuf>) -> Result<Defaults, String> {
    match path {
        Some(path) => Defaults::load(path)
            .map_err(|e| format!("validation: defaults {}: {e}", path.display())),
        None => Ok(Defaults::factory().with_env_overrides()),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DBSANDBOX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    // only commands that touch the sandbox home load defaults
    let open = || {
        load_defaults(cli.defaults.as_ref())
            .and_then(|defaults| commands::open_deployer(defaults, &cli.runner))
    };
    let result = match cli.command {
        Commands::Capabilities { flavor, version } => {
            commands::capabilities::run(flavor, version.as_deref(), json)
        }
        Commands::Deploy(DeployCommand::Single { common, port }) => open().and_then(|deployer| {
            commands::deploy::single(&deployer, common.into_options(), port, json)
        }),
        Commands::Deploy(DeployCommand::Replication {
            common,
            topology,
            nodes,
            ndb_nodes,
            single_primary,
            semisync,
            master_list,
            slave_list,
            read_only,
            super_read_only,
        }) => open().and_then(|deployer| {
            commands::deploy::topology(
                &deployer,
                common.into_options(),
                TopologyOptions {
                    kind: topology,
                    nodes,
                    ndb_nodes,
                    single_primary,
                    semisync,
                    master_list,
                    slave_list,
                    read_only,
                    super_read_only,
                },
                json,
            )
        }),
        Commands::List { check } => {
            open().and_then(|deployer| commands::list::run(&deployer, check, json))
        }
        Commands::Delete { sandbox } => {
            open().and_then(|deployer| commands::delete::run(&deployer, &sandbox, json))
        }
        Commands::DeleteBinaries { version } => {
            open().and_then(|deployer| commands::delete::binaries(&deployer, &version, json))
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
