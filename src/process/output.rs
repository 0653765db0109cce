//! Output truncation and error rendering helpers for external commands.

use color_eyre::eyre::eyre;
use std::borrow::Cow;

use super::CommandOutput;
use crate::error::{CacheError, CacheErrorKind};

pub(crate) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(crate) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Builds a `CommandFailed` error carrying the exit status and captured
/// output.
pub(crate) fn render_failure(context: &str, output: &CommandOutput) -> CacheError {
    let stdout = truncate_output(String::from_utf8_lossy(&output.stdout));
    let stderr = truncate_output(String::from_utf8_lossy(&output.stderr));
    let status = output
        .exit_code
        .map_or_else(|| "terminated by signal".to_owned(), |code| format!("exit code {code}"));
    CacheError::new(
        CacheErrorKind::CommandFailed,
        eyre!("{context} ({status})\nstdout: {stdout}\nstderr: {stderr}"),
    )
}

pub(crate) fn truncate_output(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..OUTPUT_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}
