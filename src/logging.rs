//! Subscriber setup for hosts that want the library's `tracing` output.
//!
//! The library only emits events. A host embedding it without a Rust
//! subscriber of its own can call `hostlua_init_logging` once to print them
//! to stderr.

use tracing_subscriber::EnvFilter;

/// Environment variable read when no filter is given.
pub const LOG_ENV: &str = "HOSTLUA_LOG";

/// Install a global fmt subscriber.
///
/// `directives` uses `EnvFilter` syntax (`"hostlua=debug"`). With `None` the
/// filter comes from [`LOG_ENV`], defaulting to `warn`. Returns `false` if
/// the directives do not parse or a global subscriber already exists.
pub fn init_logging(directives: Option<&str>) -> bool {
    let filter = match directives {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::warn!(%err, directives, "invalid log filter");
                return false;
            }
        },
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
