//! shell-bridge binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use shell_bridge::api::{serve_with_state, AppState};
use shell_bridge::cli::{parse_args, print_help, print_version};
use shell_bridge::config::Config;
use shell_bridge::session::{spawn_reaper, SessionRegistry};
use shell_bridge::{logging, CredentialStore, SshTransport};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_level(Some(config.log_filter()));
    info!("shell-bridge v{}", env!("CARGO_PKG_VERSION"));

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!(error = %e, "invalid server configuration");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(SessionRegistry::with_limit(config.session.max_sessions));
    let mut state = AppState::new(
        Arc::new(SshTransport::new(config.ssh_options())),
        Arc::clone(&registry),
        config.drain_policy(),
        CredentialStore::new(&config.storage.credentials_path),
    )
    .with_default_port(config.ssh.default_port)
    .with_body_limit(config.storage.max_upload_bytes);
    if let Some(ref dir) = config.storage.upload_dir {
        state = state.with_upload_dir(dir);
    }

    let reaper = spawn_reaper(Arc::clone(&registry), config.reaper_config());

    let result = serve_with_state(server_config, state).await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
