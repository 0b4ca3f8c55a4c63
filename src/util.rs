use chrono::{DateTime, Duration, Utc};

/// kubectl style age: `45s`, `12m`, `5h`, `3d`.
pub fn age(duration: &Duration) -> String {
    let seconds = duration.num_seconds().max(0);

    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if 0 < days {
        return format!("{}d", days);
    }
    if 0 < hours {
        return format!("{}h", hours);
    }
    if 0 < minutes {
        return format!("{}m", minutes);
    }
    format!("{}s", seconds)
}

pub fn age_since(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match created {
        Some(created) => age(&(now - created)),
        None => "<unknown>".to_string(),
    }
}
