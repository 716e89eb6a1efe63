/// Join an argument vector into one POSIX shell string.
pub fn shell_join<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single word; words made only of shell-inert characters pass through.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
