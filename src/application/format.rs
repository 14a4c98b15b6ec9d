// Number formatting for progress messages
use std::time::Duration;

/// Elapsed milliseconds with thousands separators and two decimals.
pub fn format_millis(elapsed: Duration) -> String {
    let hundredths = (elapsed.as_nanos() + 5_000) / 10_000;
    let whole = group_thousands(&(hundredths / 100).to_string());
    format!("{}.{:02}", whole, hundredths % 100)
}

/// Exact sum with thousands separators and twenty decimals.
pub fn format_sum(sum: i128) -> String {
    let digits = group_thousands(&sum.unsigned_abs().to_string());
    let sign = if sum < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, digits, "0".repeat(20))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
