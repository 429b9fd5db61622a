/*!
tunconf script - tunnel interface configuration hook

Called by the VPN client once per lifecycle event:
- reads the event tag and the connection parameters from the environment
- configures or deconfigures the tunnel interface
- exits with the accumulated status of every configuration command
*/

use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use tunconf::{
    CommandRunner, ConnectionParameters, Dispatcher, DryRunRunner, Reason, SessionResult,
    SystemRunner,
};

mod config;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lifecycle event: pre-init, connect or disconnect
    #[arg(long, env = "reason", default_value = "")]
    reason: String,

    /// Configuration file path
    #[arg(short, long, env = "TUNCONF_CONFIG")]
    config: Option<PathBuf>,

    /// Log the commands instead of running them
    #[arg(long, action = clap::ArgAction::SetTrue)]
    dry_run: bool,

    /// Write the session result as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            // The logger may not be up yet
            eprintln!("tunconf-script: {}", e);
            1
        }
    };

    log::logger().flush();
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32, Box<dyn Error>> {
    let mut config = config::load_config(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config::validate_config(&config)?;

    if args.print_config {
        print!("{}", config::to_toml(&config)?);
        return Ok(0);
    }

    tunconf::logging::init(&config.log_settings())?;
    log::debug!("tunconf {} ({:?})", tunconf::VERSION, config.engine.redirect_method);

    let reason = Reason::from(args.reason.as_str());
    let params = match reason {
        Reason::Connect | Reason::Disconnect => match ConnectionParameters::from_env() {
            Ok(params) => Some(params),
            Err(e) => {
                log::error!("Invalid connection parameters: {}", e);
                None
            }
        },
        _ => None,
    };

    let mut runner: Box<dyn CommandRunner> = if args.dry_run {
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner)
    };

    let session = Dispatcher::new(runner.as_mut(), config.engine.redirect_method)
        .dispatch(&reason, params.as_ref());

    if let Some(path) = &args.report {
        if let Err(e) = write_report(path, &session) {
            log::error!("Failed to write report to {}: {}", path.display(), e);
        }
    }

    Ok(session.exit_code())
}

fn write_report(path: &Path, session: &SessionResult) -> Result<(), Box<dyn Error>> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;
    Ok(())
}
