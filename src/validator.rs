//! Output validation against the expected transcript

use crate::core::error::ValidationMismatch;

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    /// Ignore blank lines at the end of either side
    pub trim_trailing_blank_lines: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            trim_trailing_blank_lines: true,
        }
    }
}

/// Split into lines with line endings unified and trailing whitespace trimmed
pub fn normalize(text: &str, options: ValidationOptions) -> Vec<String> {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = unified
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect();
    if options.trim_trailing_blank_lines {
        while lines.last().map(|s| s.is_empty()).unwrap_or(false) {
            lines.pop();
        }
    }
    lines
}

/// Compare line by line and stop at the first difference.
///
/// Returns the number of matching lines.
pub fn validate_output(
    actual: &str,
    expected: &str,
    options: ValidationOptions,
) -> Result<usize, ValidationMismatch> {
    let actual_lines = normalize(actual, options);
    let expected_lines = normalize(expected, options);

    if actual_lines.len() != expected_lines.len() {
        return Err(ValidationMismatch::LineCountMismatch {
            expected: expected_lines.len(),
            actual: actual_lines.len(),
        });
    }

    for (i, (expected, actual)) in expected_lines.iter().zip(&actual_lines).enumerate() {
        if expected != actual {
            return Err(ValidationMismatch::ContentMismatch {
                line: i + 1,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    Ok(expected_lines.len())
}
