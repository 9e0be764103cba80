//! Workspace automation tasks.

use std::process::{Command, ExitCode, Stdio};

use clap::{Parser, Subcommand};

/// Workspace automation tasks.
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format code and run clippy with auto-fix.
    Tidy,
    /// Run all tests using nextest.
    Test,
    /// Run the weather client against a freshly spawned weather server.
    Demo {
        /// Skip declaring sampling, so the server uses its fallback text.
        #[arg(long)]
        no_sampling: bool,
        /// Latitude to look up.
        #[arg(long, default_value_t = 52.37, allow_hyphen_values = true)]
        latitude: f64,
        /// Longitude to look up.
        #[arg(long, default_value_t = 4.89, allow_hyphen_values = true)]
        longitude: f64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tidy => tidy(),
        Commands::Test => exit(cargo("nextest", &["nextest", "run", "--workspace"])),
        Commands::Demo {
            no_sampling,
            latitude,
            longitude,
        } => demo(no_sampling, latitude, longitude),
    }
}

fn exit(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run `cargo <args>` with inherited stdio, reporting failures under `step`.
fn cargo(step: &str, args: &[&str]) -> bool {
    println!("Running cargo {}...", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status();

    match status {
        Ok(status) if status.success() => true,
        Ok(_) => {
            eprintln!("{step} failed");
            false
        }
        Err(e) => {
            eprintln!("Failed to run {step}: {e}");
            false
        }
    }
}

fn tidy() -> ExitCode {
    if !cargo("cargo fmt", &["fmt", "--all"]) {
        return ExitCode::FAILURE;
    }
    let ok = cargo(
        "clippy",
        &[
            "clippy",
            "-q",
            "--fix",
            "--workspace",
            "--all-targets",
            "--allow-dirty",
        ],
    );
    if ok {
        println!("\nTidy complete!");
    }
    exit(ok)
}

fn demo(no_sampling: bool, latitude: f64, longitude: f64) -> ExitCode {
    // The client spawns the server from its own target directory.
    if !cargo("build", &["build", "-q", "-p", "weather-mcp", "--bins"]) {
        return ExitCode::FAILURE;
    }
    let latitude = latitude.to_string();
    let longitude = longitude.to_string();
    let mut args = vec![
        "run",
        "-q",
        "-p",
        "weather-mcp",
        "--bin",
        "weather-client",
        "--",
        "--latitude",
        &latitude,
        "--longitude",
        &longitude,
    ];
    if no_sampling {
        args.push("--no-sampling");
    }
    exit(cargo("weather-client", &args))
}
