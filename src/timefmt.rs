//! Duration parsing for `!giveaway` and remaining-time text for embeds.

use chrono::Duration;

/// Parses `90s`, `30m`, `12h` or `2d` into a positive duration.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    // Split on a char boundary; the unit suffix may be any UTF-8 character.
    let unit = input.chars().last()?;
    let amount = &input[..input.len() - unit.len_utf8()];
    let amount: i64 = amount.parse().ok().filter(|n| *n > 0)?;
    match unit {
        's' => Some(Duration::seconds(amount)),
        'm' => Some(Duration::minutes(amount)),
        'h' => Some(Duration::hours(amount)),
        'd' => Some(Duration::days(amount)),
        _ => None,
    }
}

fn unit(value: i64, name: &str) -> String {
    if value == 1 {
        format!("1 {}", name)
    } else {
        format!("{} {}s", value, name)
    }
}

/// Renders "N days N hours N minutes N seconds", skipping leading zero
/// components and a trailing zero-second component.
pub fn remaining_text(duration: Duration) -> String {
    let total = duration.num_seconds();
    if total <= 0 {
        return "0 seconds".to_string();
    }

    let days = total / 86_400;
    let hours = total / 3_600 - days * 24;
    let minutes = total / 60 - days * 1_440 - hours * 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(unit(days, "day"));
    }
    if days > 0 || hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(unit(seconds, "second"));
    }
    parts.join(" ")
}
