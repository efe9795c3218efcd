use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const ENV_DEBUG: &str = "SATFLOW_DEBUG";

/// Sends panics to `tracing` so they end up in the same (JSON) stream as every other log line,
/// as a single `file:line:col: payload` record when no backtrace was captured.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // noop if the RUST_BACKTRACE or RUST_LIB_BACKTRACE backtrace variables are both not set
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<String>()
                .map(String::as_str)
        });

    match (panic_info.location(), payload, backtrace_captured) {
        (Some(location), Some(payload), false) => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        _ => {
            tracing::error!("{}\n{}", panic_info, backtrace);
        }
    };
}

fn debug_mode() -> bool {
    std::env::var(ENV_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level, which is `info`
/// (`debug` with `SATFLOW_DEBUG=true`). Output is flattened JSON unless in debug mode.
pub fn register() {
    let debug_mode = debug_mode();
    let default_log_level = if debug_mode {
        "debug,h2::codec=info,hyper_util=info" // connection level logs are too noisy
    } else {
        "info"
    };

    // RUST_LOG replaces the defaults entirely
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_log_level));

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
