use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use storyforge::cli::{build_request, handle_config_action, write_breakdown, Args, Command};
use storyforge::config::Config;
use storyforge::pipeline::{Pipeline, PipelineError};

/// Exit code for a run stopped with Ctrl+C.
const EXIT_INTERRUPTED: i32 = 130;

/// Load .env and set up logging.
///
/// Existing environment variables win over `.env`. `RUST_LOG` overrides the
/// default `info` filter.
fn init_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Set up the Ctrl+C handler. The pipeline checks the flag between steps.
fn setup_ctrlc_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, stopping after the current step...");
    }) {
        log::warn!("Could not set up Ctrl+C handler: {}", e);
    }
    flag
}

fn main() {
    init_env();

    let args = Args::parse();

    let config = match Config::load_with_env(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(Command::Config { action }) = args.command {
        if let Err(e) = handle_config_action(action, args.config.as_deref(), &config) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let request = match build_request(&args, &config) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let interrupt = setup_ctrlc_handler();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::from_config(&config).with_interrupt(interrupt);

    match rt.block_on(pipeline.run(request)) {
        Ok((video, breakdown)) => {
            match write_breakdown(&video, &breakdown) {
                Ok(path) => log::info!("Scene breakdown saved to {}", path.display()),
                Err(e) => log::warn!("Could not save scene breakdown: {}", e),
            }
            let shown = video.canonicalize().unwrap_or(video);
            println!("\nVideo saved: {}", shown.display());
        }
        Err(PipelineError::Interrupted) => {
            eprintln!("\nCancelled.");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
