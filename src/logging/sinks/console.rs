use std::io;

use super::{fmt_layer, BoxedLayer, Fields};
use crate::logging::config::LoggingConfig;

/// Слой вывода в stdout в формате `config.format`.
pub fn layer(config: &LoggingConfig) -> BoxedLayer {
    let console = &config.console;
    let fields = Fields {
        target: console.with_target,
        thread_names: console.with_thread_names,
        line_numbers: console.with_line_numbers,
    };
    fmt_layer(config.format, fields, console.with_ansi, io::stdout)
}
