//! Слои вывода: консоль и файл.
//!
//! Оба слоя собираются одной функцией [`fmt_layer`], отличаются только
//! writer'ом и тем, разрешены ли ANSI-цвета.

pub mod console;
pub mod file;

use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, JsonFields},
        MakeWriter,
    },
    Layer, Registry,
};

use crate::logging::config::LogFormat;

/// Слой со стёртым типом формата и writer'а.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Какие поля кроме сообщения выводить в каждой строке.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields {
    pub target: bool,
    pub thread_names: bool,
    pub line_numbers: bool,
}

pub(crate) fn fmt_layer<W>(
    format: LogFormat,
    fields: Fields,
    ansi: bool,
    writer: W,
) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::format()
        .with_target(fields.target)
        .with_thread_names(fields.thread_names)
        .with_line_number(fields.line_numbers);

    match format {
        // Машиночитаемый вывод никогда не раскрашивается.
        LogFormat::Json => Box::new(
            fmt::layer()
                .fmt_fields(JsonFields::new())
                .event_format(base.json().with_current_span(true))
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(
            fmt::layer()
                .event_format(base.pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(ansi)
                .with_writer(writer),
        ),
        LogFormat::Compact => Box::new(
            fmt::layer()
                .event_format(base.compact())
                .with_ansi(ansi)
                .with_writer(writer),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use parking_lot::Mutex;
    use tracing_subscriber::prelude::*;

    use super::*;

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Lines {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что JSON-слой пишет поля спана как объект JSON, а не
    /// как текст, и каждая строка разбирается `serde_json`.
    #[test]
    fn test_json_layer_span_fields() {
        let out = Lines::default();
        let writer = out.clone();
        let fields = Fields {
            target: true,
            thread_names: false,
            line_numbers: false,
        };
        let layer = fmt_layer(LogFormat::Json, fields, true, move || writer.clone());

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            let span = tracing::info_span!("dispatch", device = "u/js220/0001", queued = 3u64);
            let _enter = span.enter();
            tracing::info!(topic = "u/js220/0001/s/i#", code = 0, "return code");
        });

        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        let line = text.lines().next().unwrap();
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["fields"]["message"], "return code");
        assert_eq!(event["fields"]["topic"], "u/js220/0001/s/i#");
        assert_eq!(event["span"]["name"], "dispatch");
        assert_eq!(event["span"]["device"], "u/js220/0001");
        assert_eq!(event["span"]["queued"], 3);
        assert!(!text.contains("field_error"));
    }
}
