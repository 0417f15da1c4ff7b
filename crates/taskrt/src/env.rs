use std::env;
use std::sync::OnceLock;

pub(crate) const BENCH_CONFIG_VAR: &str = "TASKRT_BENCH_CONFIG";
pub(crate) const RECOVER_DISPATCH_TABLE_VAR: &str = "TASKRT_RECOVER_DISPATCH_TABLE";

static BENCH_CONFIG: OnceLock<Option<String>> = OnceLock::new();
static RECOVER_DISPATCH_TABLE: OnceLock<Option<bool>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Raw `warmup,number,repeat` triple, if set. Read once per process.
pub(crate) fn bench_config_override() -> Option<String> {
    BENCH_CONFIG
        .get_or_init(|| non_empty(BENCH_CONFIG_VAR))
        .clone()
}

pub(crate) fn recover_dispatch_table_override() -> Option<bool> {
    *RECOVER_DISPATCH_TABLE
        .get_or_init(|| non_empty(RECOVER_DISPATCH_TABLE_VAR).map(|value| parse_bool(&value)))
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
