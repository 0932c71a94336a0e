use std::process::ExitCode;

use signaling_server::run_with_config;

#[tokio::main]
async fn main() -> ExitCode {
    match run_with_config().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
