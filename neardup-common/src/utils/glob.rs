//! Compiling user-supplied filename patterns, either raw regexes or shell
//! globs translated into regexes.

use regex::{Regex, RegexBuilder};

#[derive(thiserror::Error, Debug)]
#[error("invalid pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Translates a shell glob into an anchored regex: `*` matches any sequence,
/// `?` a single character, everything else itself.
pub fn glob_to_regex(glob: &str) -> String {
    let mut rx = String::with_capacity(glob.len() * 2 + 2);
    rx.push('^');
    for c in glob.chars() {
        match c {
            '*' => rx.push_str(".*"),
            '?' => rx.push('.'),
            '.' | '\\' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '[' | ']' => {
                rx.push('\\');
                rx.push(c);
            }
            other => rx.push(other),
        }
    }
    rx.push('$');
    rx
}

/// Compiles every pattern in the list. Globs are translated first; raw
/// regexes are used as-is with substring-search semantics.
pub fn compile_patterns(
    patterns: &[String],
    use_glob: bool,
    case_insensitive: bool,
) -> Result<Vec<Regex>, PatternError> {
    patterns
        .iter()
        .map(|raw| {
            let rx = if use_glob {
                glob_to_regex(raw)
            } else {
                raw.clone()
            };
            RegexBuilder::new(&rx)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|source| PatternError {
                    pattern: raw.clone(),
                    source,
                })
        })
        .collect()
}
