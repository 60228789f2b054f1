use anklang_engine::config::{DEBUG_ENV, env_flag};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn level(verbosity: u8) -> Level {
    match verbosity {
        0 if env_flag(DEBUG_ENV) => Level::DEBUG,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global fmt subscriber, logging to stderr.
pub fn init(verbosity: u8) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level(verbosity))
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}
