//! Logging setup shared by the demo binary and anything embedding this
//! crate: colours each line by level the same way the teacher's CLI does,
//! and lets `RUST_LOG` override the default filter per the usual `env_logger`
//! convention.

use std::io::Write;

use env_logger::fmt::Color;
use log::LevelFilter;

/// Initializes `env_logger` with level-coloured output. `default_level`
/// controls the filter applied when `RUST_LOG` isn't set.
pub fn init(default_level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_env("RUST_LOG")
        .format(|buf, record| {
            let mut style = buf.style();
            let color = match record.level() {
                log::Level::Error => Color::Red,
                log::Level::Warn => Color::Yellow,
                log::Level::Info => Color::Green,
                log::Level::Debug => Color::Blue,
                log::Level::Trace => Color::Magenta,
            };
            style.set_color(color).set_bold(true);
            writeln!(
                buf,
                "{} [{}] {}",
                style.value(record.level()),
                record.target(),
                record.args()
            )
        })
        .init();
}
