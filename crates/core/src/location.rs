use thiserror::Error;

use crate::version::PythonVersion;

/// Source span attached to an instruction.
///
/// Before 3.11 only `lineno` can be populated; the 3.11+ location entries
/// carry the full span. Every field may be absent, and an absent `lineno`
/// with present columns is rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstrLocation {
    pub lineno: Option<u32>,
    pub end_lineno: Option<u32>,
    pub col_offset: Option<u32>,
    pub end_col_offset: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("line {lineno} is below the minimum of {min} for Python {version}")]
    LinenoTooSmall {
        lineno: u32,
        min: u32,
        version: PythonVersion,
    },
    #[error("end line {end} cannot be smaller than line {start}")]
    EndBeforeStart { start: u32, end: u32 },
    #[error("end line specified with no start line")]
    EndWithoutStart,
    #[error("column offsets require both start and end lines")]
    ColumnsWithoutLines,
    #[error("end column specified with no start column, or the reverse")]
    HalfColumnSpan,
    #[error("end column {end} cannot be smaller than column {start} on a single line")]
    EndColumnBeforeStart { start: u32, end: u32 },
}

impl InstrLocation {
    /// A location carrying only a line number.
    pub const fn line(lineno: u32) -> Self {
        Self {
            lineno: Some(lineno),
            end_lineno: None,
            col_offset: None,
            end_col_offset: None,
        }
    }

    pub const fn span(lineno: u32, end_lineno: u32, col: u32, end_col: u32) -> Self {
        Self {
            lineno: Some(lineno),
            end_lineno: Some(end_lineno),
            col_offset: Some(col),
            end_col_offset: Some(end_col),
        }
    }

    /// Validate the internal consistency rules for `version`.
    pub fn check(&self, version: PythonVersion) -> Result<(), LocationError> {
        if let Some(lineno) = self.lineno {
            let min = version.min_lineno();
            if lineno < min {
                return Err(LocationError::LinenoTooSmall {
                    lineno,
                    min,
                    version,
                });
            }
        }
        match (self.lineno, self.end_lineno) {
            (None, Some(_)) => return Err(LocationError::EndWithoutStart),
            (Some(start), Some(end)) if end < start => {
                return Err(LocationError::EndBeforeStart { start, end })
            }
            _ => {}
        }
        if self.col_offset.is_some() || self.end_col_offset.is_some() {
            if self.lineno.is_none() || self.end_lineno.is_none() {
                return Err(LocationError::ColumnsWithoutLines);
            }
            let (col, end_col) = match (self.col_offset, self.end_col_offset) {
                (Some(c), Some(e)) => (c, e),
                _ => return Err(LocationError::HalfColumnSpan),
            };
            // Column order only means something inside a single line.
            if self.lineno == self.end_lineno && end_col < col {
                return Err(LocationError::EndColumnBeforeStart {
                    start: col,
                    end: end_col,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_only_is_valid_everywhere() {
        for version in PythonVersion::ALL {
            assert_eq!(InstrLocation::line(7).check(version), Ok(()));
        }
    }

    #[test]
    fn line_zero_is_311_only() {
        assert!(InstrLocation::line(0).check(PythonVersion::V3_10).is_err());
        assert_eq!(InstrLocation::line(0).check(PythonVersion::V3_11), Ok(()));
    }

    #[test]
    fn half_spans_are_rejected() {
        let loc = InstrLocation {
            lineno: Some(3),
            end_lineno: Some(3),
            col_offset: Some(4),
            end_col_offset: None,
        };
        assert_eq!(
            loc.check(PythonVersion::V3_11),
            Err(LocationError::HalfColumnSpan)
        );

        let loc = InstrLocation {
            lineno: None,
            end_lineno: None,
            col_offset: Some(0),
            end_col_offset: Some(1),
        };
        assert_eq!(
            loc.check(PythonVersion::V3_11),
            Err(LocationError::ColumnsWithoutLines)
        );
    }

    #[test]
    fn backwards_spans_are_rejected() {
        assert_eq!(
            InstrLocation::span(5, 4, 0, 0).check(PythonVersion::V3_12),
            Err(LocationError::EndBeforeStart { start: 5, end: 4 })
        );
        assert_eq!(
            InstrLocation::span(5, 5, 9, 2).check(PythonVersion::V3_12),
            Err(LocationError::EndColumnBeforeStart { start: 9, end: 2 })
        );
        // Columns may go "backwards" across lines.
        assert_eq!(
            InstrLocation::span(5, 6, 9, 2).check(PythonVersion::V3_12),
            Ok(())
        );
    }
}
