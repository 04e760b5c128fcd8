//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Route panics through tracing so they carry the active request span
//! - Terminate the process on panics that escape every request
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level

use std::future::Future;
use std::panic;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Build the filter: `RUST_LOG` if set and valid, else the configured level.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber and the panic hook.
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
    }

    install_panic_hook();
    Ok(())
}

/// Exit code used when a panic escapes request handling.
pub const FATAL_EXIT_CODE: i32 = 1;

tokio::task_local! {
    static REQUEST_SCOPE: ();
}

/// Run `future` as request work. Panics inside it are caught and answered
/// with a 500 by the server, so the hook treats them as non-fatal.
pub async fn within_request<F: Future>(future: F) -> F::Output {
    REQUEST_SCOPE.scope((), future).await
}

/// Whether the current task is serving a request.
pub fn in_request() -> bool {
    REQUEST_SCOPE.try_with(|_| ()).is_ok()
}

/// Log panics at error level inside whatever span is current.
///
/// A panic outside request handling leaves the process in an unknown state,
/// so it is logged as fatal and the process exits.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "<unknown>".to_string());

        if log_panic(&payload, &location) {
            std::process::exit(FATAL_EXIT_CODE);
        }
    }));
}

/// Emit the panic event. Returns true when the panic is fatal.
fn log_panic(payload: &str, location: &str) -> bool {
    let fatal = !in_request();
    tracing::error!(panic = %payload, location = %location, fatal, "Panic");
    fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::Context;
    use tracing_subscriber::Layer;

    #[derive(Clone, Default)]
    struct FatalFlags(Arc<Mutex<Vec<bool>>>);

    struct FatalVisitor(Option<bool>);

    impl Visit for FatalVisitor {
        fn record_bool(&mut self, field: &Field, value: bool) {
            if field.name() == "fatal" {
                self.0 = Some(value);
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    impl<S: tracing::Subscriber> Layer<S> for FatalFlags {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = FatalVisitor(None);
            event.record(&mut visitor);
            if let Some(fatal) = visitor.0 {
                self.0.lock().unwrap().push(fatal);
            }
        }
    }

    #[tokio::test]
    async fn request_scope_is_task_local() {
        assert!(!in_request());
        assert!(within_request(async { in_request() }).await);
        assert!(!in_request());
        let spawned = within_request(async { tokio::spawn(async { in_request() }).await.unwrap() }).await;
        assert!(!spawned);
    }

    #[tokio::test]
    async fn panics_are_fatal_only_outside_requests() {
        let flags = FatalFlags::default();
        let subscriber = tracing_subscriber::registry().with(flags.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        assert!(log_panic("boom", "src/main.rs:1:1"));
        assert!(!within_request(async { log_panic("boom", "src/handler.rs:1:1") }).await);

        assert_eq!(*flags.0.lock().unwrap(), vec![true, false]);
    }
}
