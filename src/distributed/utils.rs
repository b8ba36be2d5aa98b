use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(in crate::distributed) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_to_ms)
        .unwrap_or(0)
}

pub(in crate::distributed) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run ids are four uppercase hex digits.
pub(in crate::distributed) fn format_run_id(counter: u32) -> String {
    format!("{:04X}", counter)
}

pub(in crate::distributed) fn parse_run_id(id: &str) -> Option<u32> {
    if id.len() != 4 || !id.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(id, 16).ok()
}
