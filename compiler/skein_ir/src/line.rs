//! Source locations.

use std::fmt;

use crate::Name;

/// Source location of a syntax-tree node or a diagnostic.
///
/// The host language is line-oriented; the external parser reports a line
/// number and (optionally) a file name. Displays as `L.<line>` or
/// `<file>[L.<line>]`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct LineInfo {
    pub line: u32,
    /// `Name::EMPTY` = no file name.
    pub file: Name,
}

impl LineInfo {
    /// Location for synthesized nodes with no source position.
    pub const UNKNOWN: LineInfo = LineInfo {
        line: 0,
        file: Name::EMPTY,
    };

    #[inline]
    pub const fn new(line: u32) -> Self {
        LineInfo {
            line,
            file: Name::EMPTY,
        }
    }

    #[inline]
    pub const fn with_file(line: u32, file: Name) -> Self {
        LineInfo { line, file }
    }

    /// Render with the file name resolved through `lookup`.
    pub fn display(&self, file_name: &str) -> String {
        if file_name.is_empty() {
            format!("L.{}", self.line)
        } else {
            format!("{}[L.{}]", file_name, self.line)
        }
    }
}

impl fmt::Debug for LineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L.{}", self.line)
    }
}

impl fmt::Display for LineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L.{}", self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_line_only_without_file() {
        let line = LineInfo::new(12);
        assert_eq!(line.to_string(), "L.12");
        assert_eq!(line.display(""), "L.12");
    }

    #[test]
    fn displays_file_when_present() {
        let line = LineInfo::with_file(3, Name::from_raw(1));
        assert_eq!(line.display("model.py"), "model.py[L.3]");
    }
}
