use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const TARGET: &str = "seminar_evals";

/// Logs go to stderr so command output on stdout stays clean.
/// `SEMINAR_LOG` (or `RUST_LOG`) overrides the flags.
pub fn init_tracing(verbose: bool, log_level: Option<&str>, log_json: bool) -> anyhow::Result<()> {
    let level = match (verbose, log_level) {
        (_, Some(level)) => directive(level),
        (true, None) => format!("{TARGET}=debug"),
        (false, None) => format!("{TARGET}=warn"),
    };

    let filter = EnvFilter::try_from_env("SEMINAR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}

fn directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("{TARGET}={level}")
    }
}
