//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,ebb_stream=debug,ebb_http=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when the variable is unset or unparsable.
///
/// Returns `false` if a global subscriber was already installed, which makes
/// it safe to call from every test.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init(DEFAULT_FILTER);
        assert!(!init(DEFAULT_FILTER));
    }
}
