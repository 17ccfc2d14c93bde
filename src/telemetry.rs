//! Tracing setup.
//!
//! Log lines go to a JSON file rather than stderr so they never fight with
//! the in-place status line. The `DEBUG` environment variable selects which
//! subsystems log at debug level: `capture`, `transcribe`, or `all`.

use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn log_path() -> PathBuf {
    env::var("SOTTO_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("sotto.jsonl"))
}

/// Map the `DEBUG` selector onto a tracing filter directive.
pub(crate) fn debug_filter(debug_env: Option<&str>) -> String {
    let Some(value) = debug_env else {
        return "info".to_string();
    };
    let value = value.to_ascii_lowercase();
    if value == "all" {
        return "debug".to_string();
    }
    let mut directives = vec!["info".to_string()];
    if value.contains("capture") {
        directives.push("sotto::audio=debug".to_string());
    }
    if value.contains("transcribe") {
        directives.push("sotto::whisper=debug".to_string());
    }
    directives.join(",")
}

pub fn init_tracing(config: &AppConfig) {
    if config.no_logs {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let filter = EnvFilter::new(debug_filter(env::var("DEBUG").ok().as_deref()));
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_env_filter(filter)
            .with_writer(std::sync::Arc::new(file))
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
