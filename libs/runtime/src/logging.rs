use crate::config::{LoggingConfig, Section};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::Level;
use tracing_subscriber::{
    filter::{FilterFn, LevelFilter, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;
const DEFAULT_MAX_BACKUPS: usize = 3;

// -------- level helpers --------
fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target == crate_name
        || (target.starts_with(crate_name) && target[crate_name.len()..].starts_with("::"))
}

/// Passes targets outside every named crate up to `max_level`.
fn default_filter(
    crate_names: Vec<String>,
    max_level: Level,
) -> FilterFn<impl Fn(&tracing::Metadata<'_>) -> bool> {
    FilterFn::new(move |meta: &tracing::Metadata<'_>| {
        let t = meta.target();
        !crate_names.iter().any(|c| matches_crate_prefix(t, c)) && meta.level() <= &max_level
    })
}

// -------- rotating writer for files --------
#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriter;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Resolve a log file path against `base_dir`.
/// Absolute paths are kept as-is; relative paths are joined with `base_dir`.
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Rotating writer at `log_path`; the parent directory is created.
fn create_rotating_writer_at_path(
    log_path: &Path,
    max_bytes: usize,
    max_files: usize,
) -> std::io::Result<RotWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(max_files)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn file_writer_for(name: &str, section: &Section, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) * 1024 * 1024;
    let max_files = section.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS);
    let log_path = resolve_log_path(&section.file, base_dir);

    match create_rotating_writer_at_path(&log_path, max_bytes as usize, max_files) {
        Ok(writer) => Some(writer),
        Err(e) => {
            // The subscriber is not installed yet.
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                log_path.display(),
                e
            );
            None
        }
    }
}

// -------- public init --------

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging from `cfg`.
///
/// The "default" section covers every target without its own section; each
/// other key names a crate (`query_db`, `query_core`, ...). Console output
/// goes to stderr in human readable form, file output is JSON. Relative file paths are resolved
/// against `base_dir`.
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` before installing the subscriber.
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        init_default_logging();
        return;
    }

    let layers = build_layers(cfg, base_dir, std::io::stderr().is_terminal());
    let _ = Registry::default().with(layers).try_init();
}

fn init_default_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_layers(cfg: &LoggingConfig, base_dir: &Path, ansi: bool) -> Vec<BoxedLayer> {
    let crate_sections: HashMap<&str, &Section> = cfg
        .iter()
        .filter(|(k, _)| k.as_str() != DEFAULT_SECTION)
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    let crate_names: Vec<String> = crate_sections.keys().map(|k| (*k).to_owned()).collect();

    let mut layers: Vec<BoxedLayer> = Vec::new();

    // Explicit crate sections: console filtered by Targets, one file each.
    let mut console_targets = Targets::new().with_default(LevelFilter::OFF);
    for (name, section) in &crate_sections {
        if let Some(level) = parse_tracing_level(&section.console_level) {
            console_targets = console_targets.with_target(*name, LevelFilter::from_level(level));
        }
        let Some(writer) = file_writer_for(name, section, base_dir) else {
            continue;
        };
        if let Some(level) = parse_tracing_level(&section.file_level) {
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(writer)
                    .with_filter(Targets::new().with_target(*name, LevelFilter::from_level(level)))
                    .boxed(),
            );
        }
    }
    layers.push(
        fmt::layer()
            .with_ansi(ansi)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .with_filter(console_targets)
            .boxed(),
    );

    // Everything else goes through the default section.
    if let Some(section) = cfg.get(DEFAULT_SECTION) {
        if let Some(level) = parse_tracing_level(&section.console_level) {
            layers.push(
                fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(std::io::stderr)
                    .with_filter(default_filter(crate_names.clone(), level))
                    .boxed(),
            );
        }
        let writer = file_writer_for(DEFAULT_SECTION, section, base_dir);
        if let (Some(writer), Some(level)) = (writer, parse_tracing_level(&section.file_level)) {
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(writer)
                    .with_filter(default_filter(crate_names, level))
                    .boxed(),
            );
        }
    }

    layers
}
