//! `smartmark` binary
//!
//! Exit status: 0 on success, otherwise the code chosen by
//! [`CliError::exit_code`](smartmark_interface::CliError::exit_code).

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match smartmark_interface::run_cli().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("smartmark: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
