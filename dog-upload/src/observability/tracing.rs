//! Subscriber bootstrap for binaries and examples embedding the uploader.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. `init_tracing` is a convenience for the
//! common case and is only compiled with the `tracing-basic` feature.

/// Default filter directive: lifecycle at info when verbose, warnings otherwise
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "dog_upload=info"
    } else {
        "dog_upload=warn"
    }
}

/// Install a global fmt subscriber honoring `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already set. JSON output is
/// selected with `DOG_UPLOAD_LOG_FORMAT=json`.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(verbose: bool) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let json = std::env::var("DOG_UPLOAD_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).try_init().is_ok()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_the_level() {
        assert_eq!(default_directive(true), "dog_upload=info");
        assert_eq!(default_directive(false), "dog_upload=warn");
    }
}
