use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

const NOISY_TARGETS: [&str; 6] = ["hyper", "hyper_util", "reqwest", "rustls", "sqlx", "want"];

/// Maps the repeated `-d` flag onto a level. Anything past three is trace.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Builds the filter used by [`init`]. `RUST_LOG` wins over the `-d` count.
pub fn build_filter(verbosity: u8, rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|value| !value.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return filter;
    }

    let level = level_for_verbosity(verbosity);
    let mut filter = EnvFilter::default().add_directive(level.into());
    for target in NOISY_TARGETS {
        if let Ok(directive) = format!("{target}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs a stderr subscriber so stdout stays clean for command output.
pub fn init(verbosity: u8) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(build_filter(verbosity, rust_log.as_deref()));

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        return;
    }

    match level_for_verbosity(verbosity) {
        LevelFilter::INFO => info!("log level: info"),
        LevelFilter::DEBUG => debug!("log level: debug"),
        LevelFilter::TRACE => debug!("log level: trace"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::WARN);
        assert_eq!(level_for_verbosity(1), LevelFilter::INFO);
        assert_eq!(level_for_verbosity(2), LevelFilter::DEBUG);
        assert_eq!(level_for_verbosity(3), LevelFilter::TRACE);
        assert_eq!(level_for_verbosity(9), LevelFilter::TRACE);
    }

    #[test]
    fn verbosity_filter_quiets_http_stack() {
        let filter = build_filter(2, None).to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("reqwest=warn"));
    }

    #[test]
    fn rust_log_overrides_verbosity() {
        let filter = build_filter(0, Some("pinmark=trace")).to_string();
        assert!(filter.contains("pinmark=trace"));
        assert!(!filter.contains("reqwest=warn"));
    }

    #[test]
    fn blank_rust_log_is_ignored() {
        let filter = build_filter(1, Some("  ")).to_string();
        assert!(filter.contains("info"));
    }
}
