//! Run commands on Telnet devices and print or save the output.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example run_commands -- -d 10.0.0.1,10.0.0.2 -u dave,bill -p pw1,pw2 -e s3cret -c "show clock, show users"
//! ```
//!
//! Targets from a file, one output file per device under a dated directory:
//! ```bash
//! cargo run --example run_commands -- -D routers.txt -C commands.txt -u admin -p secret \
//!     -s -S -O "backups/{date_time}"
//! ```
//!
//! Per-device commands from `<ip_address>_autodeploy.txt` in the current
//! directory; devices without a file are skipped:
//! ```bash
//! cargo run --example run_commands -- -D routers.txt --autodeploy -u admin
//! ```
//!
//! Passwords may come from `FERRITEL_PASSWORD` / `FERRITEL_ENABLE_SECRET`
//! instead of the command line; without either, the password is read from
//! the terminal. Ctrl-C stops the run; devices not yet reached are
//! reported as cancelled.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use ferritel::inputs::{
    load_autodeploy, load_command_list, load_target_list, split_commands, split_credentials,
    split_list,
};
use ferritel::{
    FileLayout, FileSink, OutputFormat, OutputSink, OutputTemplate, RunnerBuilder, Target,
    WriterSink,
};

#[derive(Parser)]
#[command(name = "run_commands", about = "Run commands on network devices via Telnet")]
#[command(group(ArgGroup::new("devices").required(true).args(["device", "device_list"])))]
#[command(group(ArgGroup::new("cmds").required(true).args(["commands", "command_list", "autodeploy"])))]
struct Args {
    /// Address(es) of the device(s), separated by commas
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Text file containing a list of IP addresses
    #[arg(short = 'D', long)]
    device_list: Option<PathBuf>,

    /// Command(s) to execute, separated by commas
    #[arg(short = 'c', long, num_args = 1..)]
    commands: Vec<String>,

    /// Text file containing one command per line
    #[arg(short = 'C', long)]
    command_list: Option<PathBuf>,

    /// Load commands from <ip_address>_autodeploy.txt for each device
    #[arg(long)]
    autodeploy: bool,

    /// Username(s), separated by commas
    #[arg(short = 'u', long, env = "FERRITEL_USERNAME")]
    username: String,

    /// Password(s), separated by commas; prompted for when missing
    #[arg(short = 'p', long, env = "FERRITEL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Secret for enable mode
    #[arg(short = 'e', long, env = "FERRITEL_ENABLE_SECRET", hide_env_values = true)]
    enable_password: Option<String>,

    /// Do not go into enable mode
    #[arg(short = 'n', long)]
    no_enable: bool,

    /// Save the output to text file(s)
    #[arg(short = 's', long)]
    save: bool,

    /// Directory to save to; may contain {date_time}, {ip_address}, {hostname}, {username}
    #[arg(short = 'O', long, default_value = ".")]
    output_directory: String,

    /// Save the output of each device to a separate file
    #[arg(short = 'S', long)]
    separate_output: bool,

    /// One line per command: address, hostname, output
    #[arg(short = 'T', long, conflicts_with = "json")]
    table: bool,

    /// JSON Lines output, one object per device
    #[arg(long)]
    json: bool,

    /// Devices processed at once
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Telnet port
    #[arg(long, default_value_t = 23)]
    port: u16,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 4)]
    connect_timeout: u64,

    /// Seconds to wait for each prompt
    #[arg(long, default_value_t = 7)]
    read_timeout: u64,

    /// Upper bound in seconds for one login attempt, start to finish
    #[arg(long)]
    attempt_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("[!] {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every device succeeded.
async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let targets: Vec<Target> = match (&args.device_list, &args.device) {
        (Some(path), _) => load_target_list(path).await?,
        (None, Some(inline)) => split_list(inline).into_iter().map(Target::from).collect(),
        (None, None) => Vec::new(),
    };

    let password = match args.password {
        Some(password) => password,
        None => {
            eprint!("Password(s): ");
            tokio::task::spawn_blocking(rpassword::read_password).await??
        }
    };

    let mut builder = RunnerBuilder::new();
    if args.autodeploy {
        builder = builder.target_commands(load_autodeploy(".", &targets).await?);
    } else {
        let commands = match &args.command_list {
            Some(path) => load_command_list(path).await?,
            // Join the words back together, then split on commas
            None => split_commands(&args.commands.join(" ")),
        };
        builder = builder.commands(commands);
    }

    builder = builder
        .targets(targets)
        .usernames(split_credentials(&args.username))
        .passwords(split_credentials(&password))
        .port(args.port)
        .connect_timeout(Duration::from_secs(args.connect_timeout))
        .read_timeout(Duration::from_secs(args.read_timeout))
        .elevate(!args.no_enable)
        .concurrency(args.jobs);

    if let Some(secret) = &args.enable_password {
        builder = builder.enable_secret(secret);
    }
    if let Some(secs) = args.attempt_timeout {
        builder = builder.attempt_timeout(Duration::from_secs(secs));
    }

    let runner = builder.build()?;

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[!] Interrupted, closing sessions...");
            cancel.cancel();
        }
    });

    let format = if args.json {
        OutputFormat::Json
    } else if args.table {
        OutputFormat::Table
    } else {
        OutputFormat::Text
    };

    let mut sink: Box<dyn OutputSink> = if args.save {
        let layout = if args.separate_output {
            FileLayout::PerDevice
        } else {
            FileLayout::Combined
        };
        Box::new(FileSink::new(
            OutputTemplate::new(args.output_directory),
            layout,
            format,
        ))
    } else {
        Box::new(WriterSink::stdout(format))
    };

    let summary = runner.run_with_sink(&mut sink).await?;
    eprintln!(
        "[+] {} device(s): {} ok, {} degraded, {} skipped, {} failed",
        summary.targets, summary.succeeded, summary.degraded, summary.skipped, summary.failed
    );

    Ok(summary.failed == 0)
}
