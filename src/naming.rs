//! URL-safe file names from arbitrary titles.
//!
//! Used by the `FileName` module to turn a title like `"Hello, World!"` into
//! `hello-world`. The steps, in order:
//!
//! 1. trim surrounding whitespace
//! 2. drop runs of two or more dashes
//! 3. drop reserved characters (see [`RESERVED_CHARS`]) unless allowed
//! 4. trim leading and trailing dots unless `.` is allowed
//! 5. collapse whitespace runs to a single space, then spaces to dashes
//! 6. lowercase
//!
//! Examples:
//! - `"Hello, World!"` → `hello-world`
//! - `"  My   Post  "` → `my-post`
//! - `"what--is--this"` → `whatisthis`
//! - `".hidden."` → `hidden`

/// Characters removed from optimized names unless explicitly allowed.
pub const RESERVED_CHARS: &[char] = &[
    '-', '_', '~', ':', '/', '?', '#', '[', ']', '@', '!', '$', '&', '\'', '(', ')', '*', '+',
    ',', ';', '=', '}',
];

/// Optimize `name` for use in a URL, keeping any character in `allowed`.
pub fn optimize_file_name(name: &str, allowed: &[char]) -> String {
    let trimmed = name.trim();
    let without_dash_runs = remove_dash_runs(trimmed);

    let mut cleaned: String = without_dash_runs
        .chars()
        .filter(|c| allowed.contains(c) || !RESERVED_CHARS.contains(c))
        .collect();

    if !allowed.contains(&'.') {
        cleaned = cleaned.trim_matches('.').to_string();
    }

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

fn remove_dash_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = 0;
    for c in s.chars() {
        if c == '-' {
            run += 1;
            continue;
        }
        if run == 1 {
            out.push('-');
        }
        run = 0;
        out.push(c);
    }
    if run == 1 {
        out.push('-');
    }
    out
}
