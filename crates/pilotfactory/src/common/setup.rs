use env_logger::DEFAULT_FILTER_ENV;
use env_logger::fmt::style::{AnsiColor, Style};
use log::LevelFilter;
use std::io::Write;

/// Sets the behavior of the logger, based on the `verbose` flag and on passed environment
/// variables such as `RUST_LOG`.
pub fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let has_debug = std::env::var(DEFAULT_FILTER_ENV)
        .map(|v| v.contains("debug") || v.contains("trace"))
        .unwrap_or(false);

    if verbose || has_debug {
        builder.format_timestamp_millis();
    } else {
        // Shortened format
        // <time> <level> <message>
        builder.format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();
            let time_style = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
            writeln!(
                buf,
                "{time_style}{}{time_style:#} {level_style}{}{level_style:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }

    // Overwrite the defaults from env
    builder.parse_default_env();
    builder.init();
}
