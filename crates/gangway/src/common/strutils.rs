/// Quotes a string for safe interpolation into a POSIX shell command line.
pub fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/' | b':'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Generates a scheduler-safe job name: a letter followed by digits, unique
/// enough to look up a lost job id by name later.
pub fn generate_job_name() -> String {
    use rand::Rng;
    let suffix: u64 = rand::rng().random_range(1_000_000_000..10_000_000_000);
    format!("A{suffix}")
}
