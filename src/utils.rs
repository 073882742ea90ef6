use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::{ProgressStyle, style::TemplateError};

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut acc = String::with_capacity(bytes.len() * 2);

    for byte in bytes {
        let _ = write!(&mut acc, "{byte:02x}");
    }

    acc
}

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Progress bar shown for a whole stage.
pub(crate) fn get_style_stage() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("=>-"))
}

/// Spinner shown for a single running task.
pub(crate) fn get_style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::default_spinner().template("  {spinner:.blue} {msg}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_lowercase_and_padded() {
        assert_eq!(hex(&[0x00, 0x0f, 0xab]), "000fab");
    }
}
