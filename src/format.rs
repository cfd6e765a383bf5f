/// Countdown as `MM:SS`
pub fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Lockout countdown as `HH:MM:SS`; anything at or below zero is `00:00:00`
pub fn format_lock_countdown(seconds: i64) -> String {
    if seconds <= 0 {
        return "00:00:00".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
