//! Command line plumbing shared by the binaries of the workspace.

use std::{fs::File, sync::Arc};

use clap::builder::styling::{AnsiColor, Effects, Styles};

pub use clap;
pub use clap_verbosity_flag as verbose;

/// Colour scheme of the help messages.
pub fn get_styles() -> Styles {
    Styles::styled()
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
}

/// Map the `-v` count to a tracing level. Without any flag only errors are
/// shown; each `-v` makes the output one level chattier.
pub fn verbose_level_to_trace(level: Option<verbose::Level>) -> &'static tracing::Level {
    match level {
        Some(verbose::Level::Error) => &tracing::Level::WARN,
        Some(verbose::Level::Warn) => &tracing::Level::INFO,
        Some(verbose::Level::Info) => &tracing::Level::DEBUG,
        Some(verbose::Level::Debug) => &tracing::Level::TRACE,
        Some(verbose::Level::Trace) => &tracing::Level::TRACE,
        None => &tracing::Level::ERROR,
    }
}

/// Install the global subscriber. Logs go to stderr, or as JSON lines to
/// `file` when one is given. Calling it twice keeps the first subscriber.
pub fn logging_setup(level: &tracing::Level, file: Option<&File>) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(*level)
        .with_target(false);
    let result = match file.map(File::try_clone) {
        Some(Ok(file)) => builder.json().with_writer(Arc::new(file)).try_init(),
        Some(Err(err)) => {
            eprintln!("cannot log to file ({err}), falling back to stderr");
            builder.with_writer(std::io::stderr).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}
