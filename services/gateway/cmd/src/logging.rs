use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths
const SOURCE_WIDTH: usize = 24;
const LOG_LEVEL_WIDTH: usize = 9;

/// Log line formatter: `[timestamp] [source] [level] message`.
///
/// The source column is the session alias when the event carries an `alias`
/// field, the `component` field otherwise, and the service name as fallback.
pub struct GatewayLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log with a `component` field
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log with a `component` field
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log with a `component` field
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl GatewayLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_color(service_name, std::io::stdout().is_terminal())
    }

    pub fn with_color(service_name: impl Into<String>, color_enabled: bool) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled,
        }
    }

    fn format_source(&self, fields: &FieldVisitor) -> String {
        let name = match (&fields.alias, &fields.component) {
            (Some(alias), _) if alias.is_empty() => format!("{}[default]", self.service_name),
            (Some(alias), _) => format!("{}[{}]", self.service_name, alias),
            (None, Some(component)) => format!("{}-{}", self.service_name, component),
            (None, None) => self.service_name.clone(),
        };

        if name.chars().count() > SOURCE_WIDTH {
            let cut: String = name.chars().take(SOURCE_WIDTH - 1).collect();
            format!("{}…", cut)
        } else {
            format!("{:<width$}", name, width = SOURCE_WIDTH)
        }
    }

    fn format_level(level: &tracing::Level) -> String {
        let label = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH)
    }

    fn level_color(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn format_line(&self, timestamp: &str, level: &tracing::Level, fields: &FieldVisitor) -> String {
        let (cyan, color, reset) = if self.color_enabled {
            (COLOR_CYAN, self.level_color(level), COLOR_RESET)
        } else {
            ("", "", "")
        };

        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_source(fields),
            color,
            Self::format_level(level),
            reset,
            fields.message
        );
        for (name, value) in &fields.extra {
            line.push_str(&format!(" {}={}", name, value));
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for GatewayLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        writeln!(
            writer,
            "{}",
            self.format_line(&timestamp, event.metadata().level(), &fields)
        )
    }
}

/// Collects the message, the source fields and any other structured fields
#[derive(Default)]
struct FieldVisitor {
    message: String,
    alias: Option<String>,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl FieldVisitor {
    fn store(&mut self, name: &'static str, value: String) {
        match name {
            "message" => self.message = value,
            "alias" => self.alias = Some(value),
            "component" => self.component = Some(value),
            other => self.extra.push((other, value)),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let rendered = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);
        self.store(field.name(), rendered);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.store(field.name(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(alias: Option<&str>, component: Option<&str>) -> FieldVisitor {
        FieldVisitor {
            message: "Session ready".to_string(),
            alias: alias.map(str::to_string),
            component: component.map(str::to_string),
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_source_column() {
        let formatter = GatewayLogFormatter::with_color("gateway", false);

        assert_eq!(formatter.format_source(&fields(Some("main"), None)).trim_end(), "gateway[main]");
        assert_eq!(formatter.format_source(&fields(Some(""), None)).trim_end(), "gateway[default]");
        assert_eq!(formatter.format_source(&fields(None, Some("config"))).trim_end(), "gateway-config");
        assert_eq!(formatter.format_source(&fields(None, None)).len(), SOURCE_WIDTH);

        let long = formatter.format_source(&fields(Some("a-very-long-session-alias"), None));
        assert_eq!(long.chars().count(), SOURCE_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_plain_line() {
        let formatter = GatewayLogFormatter::with_color("gateway", false);
        let mut visitor = fields(Some("main"), None);
        visitor.extra.push(("session_id", "abc".to_string()));

        let line = formatter.format_line("2024-01-01 00:00:00.000", &tracing::Level::INFO, &visitor);
        assert!(line.starts_with("[2024-01-01 00:00:00.000] [gateway[main]"));
        assert!(line.contains("ℹ INFO"));
        assert!(line.ends_with("Session ready session_id=abc"));
        assert!(!line.contains('\x1b'));
    }
}
