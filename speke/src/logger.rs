use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored lines for terminals.
    #[default]
    Text,
    /// One JSON object per line for log collectors.
    Json,
}

/// Writes records to stderr so stdout only carries command output.
///
/// Records of other crates (reqwest, hyper...) are only shown from warn up.
pub struct Logger {
    format: LogFormat,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    fn format(&self, record: &Record) -> String {
        match self.format {
            LogFormat::Json => serde_json::json!({
                "level": record.level().as_str(),
                "target": record.target(),
                "message": record.args().to_string(),
            })
            .to_string(),
            LogFormat::Text => match log::max_level() {
                LevelFilter::Debug | LevelFilter::Trace => {
                    let location = match (record.file(), record.line()) {
                        (Some(file), Some(line)) => format!("[{}:{}]", file, line).dimmed(),
                        _ => "[unk]".dimmed(),
                    };

                    format!(
                        "{} {} {} {}",
                        label(record.level()),
                        record.target().dimmed(),
                        location,
                        record.args()
                    )
                }
                _ => match record.level() {
                    Level::Info => record.args().to_string(),
                    level => format!("{} {}", label(level), record.args()),
                },
            },
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
            && (is_own_target(metadata.target()) || metadata.level() <= Level::Warn)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", self.format(record));
        }
    }

    fn flush(&self) {}
}

fn is_own_target(target: &str) -> bool {
    ["speke", "speke_cpix"]
        .iter()
        .any(|x| target == *x || target.starts_with(&format!("{}::", x)))
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}
