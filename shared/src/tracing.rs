use crate::arguments::LogFormat;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber from the configured env-filter string.
///
/// The json format is intended for log collectors, the text format for humans; ansi colors are
/// only enabled when stderr is a terminal.
pub fn initialize(filter: &str, format: LogFormat) {
    let filter = EnvFilter::new(filter);
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(atty::is(atty::Stream::Stderr))
                .init();
        }
    }
}
