use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Launch and remotely drive a Chromium-embedding desktop app",
    long_about = "Kestrel launches a desktop app headlessly, discovers its remote-debugging \
                  endpoint, attaches to its windows, and harvests console, IPC, and network \
                  diagnostics across all of the app's JavaScript worlds."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an app, attach to its window, and stream diagnostics
    Launch {
        /// Command to launch
        #[arg(value_name = "COMMAND")]
        command: String,

        /// Arguments passed through to the command
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Debugging port (allocated automatically when omitted)
        #[arg(long)]
        port: Option<u16>,

        /// Endpoint discovery budget in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Run with a visible window instead of headless
        #[arg(long)]
        headed: bool,

        /// Working directory for the launched app
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Extra environment variables (KEY=VALUE, repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Directory for logs and the launch descriptor
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Attach to the window whose title contains this text
        #[arg(long)]
        window_title: Option<String>,

        /// Attach to the window whose URL includes this text
        #[arg(long)]
        window_url: Option<String>,

        /// Trace inter-process calls through the privileged bridge
        #[arg(long)]
        trace_ipc: bool,
    },

    /// Terminate a previously launched app via its descriptor file
    Quit {
        /// Path to the launch descriptor (launch.json)
        #[arg(long, value_name = "FILE")]
        descriptor: PathBuf,

        /// Termination confirmation budget in milliseconds
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },

    /// Generate shell completion scripts
    #[command(after_help = "SUPPORTED SHELLS: bash, zsh, fish, powershell, elvish")]
    Completion {
        /// Shell to generate completions for
        #[arg(long)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Launch {
            command,
            args,
            port,
            timeout_ms,
            headed,
            cwd,
            env,
            artifact_dir,
            window_title,
            window_url,
            trace_ipc,
        } => commands::launch::execute(commands::launch::LaunchArgs {
            command,
            args,
            port,
            timeout_ms,
            headed,
            cwd,
            env,
            artifact_dir,
            window_title,
            window_url,
            trace_ipc,
        }),
        Commands::Quit {
            descriptor,
            timeout_ms,
        } => commands::quit::execute(&descriptor, timeout_ms),
        Commands::Completion { shell } => {
            commands::completion::execute(shell, &mut Cli::command())
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("kestrel=debug,kestrel_core=debug,kestrel_driver=debug")
    } else {
        EnvFilter::new("kestrel=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
