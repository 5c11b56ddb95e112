/// Make `name` usable as a single path component.
///
/// Separators, characters reserved on common filesystems and control
/// characters become `_`. Names that would resolve to the current or parent
/// directory are replaced entirely.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match sanitized.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}
