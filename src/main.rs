//! taskwarden CLI entry point.
//!
//! Parses command-line arguments and dispatches to the appropriate command handler.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use taskwarden::commands::{
    config_init_command, config_path_command, config_show_command, monitor_command, run_command,
    watch_command, CommonOptions, MonitorOptions, RunOptions, SamplingOverrides, WatchOptions,
};
use taskwarden::config::TransportKind;
use taskwarden::output::print_error;

#[derive(Parser)]
#[command(name = "taskwarden")]
#[command(
    version,
    about = "Supervise a long-running command, record host resource usage, and email a summary when it ends",
    after_help = "EXAMPLES:
    # Run a training job and mail the team when it ends
    taskwarden run --to ops@example.com -- python train.py --epochs 30

    # Sample every second, send output to files
    taskwarden run --interval 1 --stdout job.out --stderr job.err -- ./job.sh

    # Just record resource usage for ten minutes
    taskwarden monitor --duration 600

    # Check uploaded logs every 15 minutes and mail any problems
    taskwarden watch --sources s3://my-bucket/logs/log_a.txt --to ops@example.com

    # Create or inspect the config file
    taskwarden config init
    taskwarden config show"
)]
struct Cli {
    /// Config file to use instead of ~/.config/taskwarden/config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write taskwarden's own diagnostics to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command under supervision
    #[command(after_help = "EXAMPLES:
    taskwarden run -- make -j8
    taskwarden run --to a@example.com,b@example.com --cloud -- ./train.sh
    taskwarden run --no-sampling --workdir /data -- ./etl.py

BEHAVIOR:
    Exactly one notification is sent per run: \"Process concluded\" when the
    command exits on its own, \"Process terminated\" when taskwarden receives
    Ctrl+C or SIGTERM (the command is then killed). The resource log and any
    rendered plot are attached. A second Ctrl+C exits immediately.

    taskwarden exits with the command's exit code, or 1 if it was terminated.")]
    Run {
        /// Recipient address (repeat or comma-separate for several).
        /// Replaces the recipients from the config file.
        #[arg(long = "to", value_name = "ADDRESS", value_delimiter = ',')]
        to: Vec<String>,

        /// Sender address
        #[arg(long = "from", value_name = "ADDRESS")]
        from: Option<String>,

        /// How notifications are delivered
        #[arg(long, value_enum)]
        transport: Option<TransportKind>,

        #[command(flatten)]
        sampling: SamplingArgs,

        /// Do not record resource usage
        #[arg(long)]
        no_sampling: bool,

        /// Command that renders the resource log into an image to attach
        #[arg(long, value_name = "COMMAND")]
        plot_command: Option<String>,

        /// Working directory for the command
        #[arg(long, value_name = "DIR")]
        workdir: Option<PathBuf>,

        /// Redirect the command's stdout to this file
        #[arg(long, value_name = "FILE")]
        stdout: Option<PathBuf>,

        /// Redirect the command's stderr to this file
        #[arg(long, value_name = "FILE")]
        stderr: Option<PathBuf>,

        /// The command to run, with its arguments
        #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Record host resource usage until Ctrl+C
    #[command(after_help = "EXAMPLES:
    taskwarden monitor
    taskwarden monitor --interval 1 --output-dir /tmp/usage
    taskwarden monitor --duration 3600")]
    Monitor {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<f64>,
    },

    /// Check uploaded resource logs and mail a report when something is wrong
    #[command(after_help = "EXAMPLES:
    taskwarden watch --sources my-bucket/logs/a.txt,my-bucket/logs/b.txt
    taskwarden watch --source-file fleet.txt --interval 300
    taskwarden watch --once

BEHAVIOR:
    Each check downloads every log through the configured upload store and
    averages its most recent rows. A log is reported when it cannot be
    fetched or parsed, has not grown since the previous check, or its CPU,
    memory or disk averages cross the [watch] limits. All problems found in
    one check go out in a single \"Periodic update\" message.

    A source file lists one location per line, optionally followed by a
    display name. Blank lines and lines starting with # are skipped.")]
    Watch {
        /// Log locations ([s3://]bucket/key), comma-separated or repeated
        #[arg(long, value_name = "LOCATION", value_delimiter = ',')]
        sources: Vec<String>,

        /// File listing one log location per line
        #[arg(long, value_name = "FILE")]
        source_file: Option<PathBuf>,

        /// Seconds between checks
        #[arg(long, value_name = "SECS")]
        interval: Option<f64>,

        /// Most recent rows averaged per check
        #[arg(long, value_name = "N")]
        recent_rows: Option<usize>,

        /// Directory logs are downloaded to
        #[arg(long, value_name = "DIR")]
        scratch_dir: Option<PathBuf>,

        /// Recipient address (repeat or comma-separate for several).
        /// Replaces the recipients from the config file.
        #[arg(long = "to", value_name = "ADDRESS", value_delimiter = ',')]
        to: Vec<String>,

        /// Sender address
        #[arg(long = "from", value_name = "ADDRESS")]
        from: Option<String>,

        /// How reports are delivered
        #[arg(long, value_enum)]
        transport: Option<TransportKind>,

        /// Check once and exit
        #[arg(long)]
        once: bool,
    },

    /// Show, locate or create the config file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (default)
    Show,

    /// Print the config file path
    Path,

    /// Write the commented default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct SamplingArgs {
    /// Seconds between samples
    #[arg(long, value_name = "SECS")]
    interval: Option<f64>,

    /// Seconds of history used as the I/O delta baseline
    #[arg(long, value_name = "SECS")]
    alarm_window: Option<f64>,

    /// Directory for the resource log
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Filesystem whose usage is reported
    #[arg(long, value_name = "DIR")]
    mount_point: Option<PathBuf>,

    /// Identify this machine by its EC2 instance id
    #[arg(long)]
    cloud: bool,
}

impl From<SamplingArgs> for SamplingOverrides {
    fn from(args: SamplingArgs) -> Self {
        Self {
            interval_secs: args.interval,
            alarm_window_secs: args.alarm_window,
            output_dir: args.output_dir,
            mount_point: args.mount_point,
            cloud: args.cloud,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let common = CommonOptions {
        config: cli.config,
        log_file: cli.log_file,
        verbose: cli.verbose,
    };

    let result = match cli.command {
        Commands::Run {
            to,
            from,
            transport,
            sampling,
            no_sampling,
            plot_command,
            workdir,
            stdout,
            stderr,
            command,
        } => run_command(RunOptions {
            common,
            sampling: sampling.into(),
            recipients: to,
            sender: from,
            transport,
            no_sampling,
            plot_command,
            working_dir: workdir,
            stdout,
            stderr,
            command,
        }),

        Commands::Monitor { sampling, duration } => monitor_command(MonitorOptions {
            common,
            sampling: sampling.into(),
            duration_secs: duration,
        })
        .map(|()| 0),

        Commands::Watch {
            sources,
            source_file,
            interval,
            recent_rows,
            scratch_dir,
            to,
            from,
            transport,
            once,
        } => watch_command(WatchOptions {
            common,
            sources,
            source_file,
            interval_secs: interval,
            recent_rows,
            scratch_dir,
            recipients: to,
            sender: from,
            transport,
            once,
        })
        .map(|()| 0),

        Commands::Config { action } => {
            let path = common.config.as_deref();
            match action {
                None | Some(ConfigAction::Show) => config_show_command(path),
                Some(ConfigAction::Path) => config_path_command(path),
                Some(ConfigAction::Init { force }) => config_init_command(path, force),
            }
            .map(|()| 0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(1);
        }
    }
}
