use lumen::{cli, commands};

fn main() {
    // Process CLI arguments first (before logging init for cleaner output)
    let (command, runtime_options) = match cli::process_cli() {
        cli::CliResult::Exit(code) => std::process::exit(code),
        cli::CliResult::Continue(command, options) => (command, options),
    };
    // Routes all log::info!() etc. to stderr.
    // CLI --log-level flag takes precedence over LUMEN_LOG.
    lumen::debug::init_log_bridge(runtime_options.log_level);

    log::debug!("Starting lumen {}", lumen::VERSION);

    let code = match commands::run(command, &runtime_options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("lumen: error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}
