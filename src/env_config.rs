/// Centralized environment-variable parsing helpers.
///
/// Tuning knobs read from the environment go through these helpers so the
/// truthy/falsey parsing lives in one place.

/// Caps the number of zero-timeout polls each region makes while warming
/// up. Unset means poll until the first frame arrives.
pub(crate) const WARMUP_POLL_LIMIT_VAR: &str = "MONDUP_WARMUP_POLL_LIMIT";

/// Enables per-frame grab/copy/total timing trace logs.
pub(crate) const LOG_FRAME_TIMINGS_VAR: &str = "MONDUP_LOG_FRAME_TIMINGS";

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

/// Parses the environment variable as a `u64`, returning `Some` only when
/// the value is a valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

fn parse_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_when(fn_name, "ENV_VAR")` is off unless the env var is truthy.
macro_rules! define_env_flag {
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;
