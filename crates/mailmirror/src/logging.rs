use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::xdg_state_dir;

const LOG_ENV: &str = "MAILMIRROR_LOG";

/// With `MAILMIRROR_LOG` set, everything matching its filter goes to the
/// state-dir log file. Otherwise only warnings reach stderr.
pub(crate) fn init_logging() {
    let Ok(value) = std::env::var(LOG_ENV) else {
        init_stderr();
        return;
    };
    let path = xdg_state_dir().join("mailmirror").join("mailmirror.log");
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path);
    match file {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(filter_directive(&value)))
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        Err(_) => init_stderr(),
    }
}

fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `MAILMIRROR_LOG=1` (or any flag-like value) means debug for everything.
fn filter_directive(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() || value == "1" || value.eq_ignore_ascii_case("true") {
        return "debug".to_string();
    }
    value.to_string()
}
