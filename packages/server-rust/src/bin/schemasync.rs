use std::process::ExitCode;

use clap::Parser;
use schemasync_server::cli::{run, Cli};
use schemasync_server::telemetry::init_tracing;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(&cli) {
        Ok(report) => {
            println!("{}", report.output);
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
