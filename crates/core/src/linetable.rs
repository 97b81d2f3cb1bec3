//! The three packed line-number table formats.
//!
//! - `lnotab` (3.8, 3.9): `(byte_delta: u8, line_delta: i8)` event pairs.
//! - the 3.10 pair table: `(byte_delta: u8, line_delta: i8)` *range* pairs
//!   where the line delta applies before the range and `-128` marks a range
//!   with no source line.
//! - the 3.11+ location entries: variable-length records carrying end-line
//!   and column spans, each covering 1..=8 code units.

use itertools::Itertools;

use crate::error::DecodeError;
use crate::location::InstrLocation;
use crate::varint::{
    read_location_signed_varint, read_location_varint, write_location_signed_varint,
    write_location_varint,
};

/// One instruction's contribution when encoding the 3.8..3.10 tables.
#[derive(Clone, Copy, Debug)]
pub struct LineRecord {
    /// Byte offset of the instruction, `EXTENDED_ARG` prefixes included.
    pub offset: u32,
    /// Encoded size in bytes.
    pub size: u32,
    /// Resolved source line, if any.
    pub line: Option<u32>,
}

/// A decoded range of the 3.8..3.10 tables: bytes `start..end` map to `line`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineEntry {
    pub start: u32,
    pub end: u32,
    pub line: Option<u32>,
}

// --- lnotab (3.8 / 3.9)

pub fn encode_lnotab(first_lineno: u32, records: &[LineRecord]) -> Vec<u8> {
    let mut lnotab = Vec::new();
    let mut old_offset: u32 = 0;
    let mut old_lineno = i64::from(first_lineno);

    for record in records {
        // lnotab cannot express "no line"; such instructions inherit the
        // previous line and contribute no event.
        let Some(line) = record.line else { continue };
        let mut dlineno = i64::from(line) - old_lineno;
        if dlineno == 0 {
            continue;
        }
        old_lineno = i64::from(line);

        let mut doff = record.offset - old_offset;
        old_offset = record.offset;

        while doff > 255 {
            lnotab.extend_from_slice(&[255, 0]);
            doff -= 255;
        }
        while dlineno < -128 {
            lnotab.extend_from_slice(&[doff as u8, (-128i8) as u8]);
            doff = 0;
            dlineno += 128;
        }
        while dlineno > 127 {
            lnotab.extend_from_slice(&[doff as u8, 127]);
            doff = 0;
            dlineno -= 127;
        }
        lnotab.extend_from_slice(&[doff as u8, (dlineno as i8) as u8]);
    }

    lnotab
}

pub fn decode_lnotab(
    data: &[u8],
    first_lineno: u32,
    code_size: u32,
) -> Result<Vec<LineEntry>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::MalformedLineTable);
    }

    // Line-start events, in the manner of `dis.findlinestarts`.
    let mut events: Vec<(u32, i64)> = Vec::new();
    let mut addr: u32 = 0;
    let mut lineno = i64::from(first_lineno);
    let mut last_emitted: Option<i64> = None;
    for pair in data.chunks_exact(2) {
        let byte_incr = u32::from(pair[0]);
        let line_incr = i64::from(pair[1] as i8);
        if byte_incr > 0 {
            if last_emitted != Some(lineno) {
                events.push((addr, lineno));
                last_emitted = Some(lineno);
            }
            addr += byte_incr;
        }
        lineno += line_incr;
    }
    if last_emitted != Some(lineno) {
        events.push((addr, lineno));
    }

    let mut entries = Vec::with_capacity(events.len());
    for (i, &(start, line)) in events.iter().enumerate() {
        let end = events.get(i + 1).map_or(code_size, |&(next, _)| next);
        if end > start && line >= 0 {
            entries.push(LineEntry {
                start,
                end,
                line: Some(line as u32),
            });
        }
    }
    Ok(entries)
}

// --- 3.10 pair table

const NO_LINE_MARKER: i8 = -128;

fn pack_pair(table: &mut Vec<u8>, mut doff: u32, delta: Option<i64>) {
    let Some(mut dlineno) = delta else {
        // A line-less range, possibly longer than one pair can express.
        while doff > 254 {
            table.extend_from_slice(&[254, NO_LINE_MARKER as u8]);
            doff -= 254;
        }
        table.extend_from_slice(&[doff as u8, NO_LINE_MARKER as u8]);
        return;
    };

    // Fold line jumps beyond i8 range into zero-offset pairs.
    while dlineno < -127 {
        table.extend_from_slice(&[0, (-127i8) as u8]);
        dlineno += 127;
    }
    while dlineno > 127 {
        table.extend_from_slice(&[0, 127]);
        dlineno -= 127;
    }

    if doff > 254 {
        table.extend_from_slice(&[254, dlineno as u8]);
        doff -= 254;
        while doff > 254 {
            table.extend_from_slice(&[254, 0]);
            doff -= 254;
        }
        table.extend_from_slice(&[doff as u8, 0]);
    } else {
        table.extend_from_slice(&[doff as u8, (dlineno as i8) as u8]);
    }
}

pub fn encode_pairs(first_lineno: u32, records: &[LineRecord]) -> Vec<u8> {
    let mut iter = records.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut table = Vec::new();
    let mut old_offset: u32 = 0;

    // The delta of each range is written when the *next* range begins, so
    // the encoder runs one range behind, exactly like the decoder applies
    // the delta before the range it reads.
    let mut last_line: Option<u32> = first.line;
    let mut last_known = i64::from(first_lineno);
    let mut pending: Option<i64> = first.line.map(|l| i64::from(l) - last_known);
    if let Some(line) = first.line {
        last_known = i64::from(line);
    }
    let (mut offset, mut size) = (first.offset, first.size);

    for record in iter {
        if record.line == last_line {
            offset = record.offset;
            size = record.size;
            continue;
        }
        last_line = record.line;

        let doff = record.offset - old_offset;
        old_offset = record.offset;
        pack_pair(&mut table, doff, pending);

        pending = record.line.map(|l| {
            let delta = i64::from(l) - last_known;
            last_known = i64::from(l);
            delta
        });
        offset = record.offset;
        size = record.size;
    }

    let doff = offset + size - old_offset;
    pack_pair(&mut table, doff, pending);

    table
}

pub fn decode_pairs(data: &[u8], first_lineno: u32) -> Result<Vec<LineEntry>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::MalformedLineTable);
    }

    let mut entries: Vec<LineEntry> = Vec::new();
    let mut pos: u32 = 0;
    let mut computed = i64::from(first_lineno);
    for pair in data.chunks_exact(2) {
        let sdelta = u32::from(pair[0]);
        let ldelta = pair[1] as i8;
        let line = if ldelta == NO_LINE_MARKER {
            None
        } else {
            computed += i64::from(ldelta);
            if computed < 0 {
                return Err(DecodeError::MalformedLineTable);
            }
            Some(computed as u32)
        };
        if sdelta > 0 {
            // Merge with the previous range when the line repeats.
            match entries.last_mut() {
                Some(last) if last.line == line && last.end == pos => {
                    last.end = pos + sdelta;
                }
                _ => entries.push(LineEntry {
                    start: pos,
                    end: pos + sdelta,
                    line,
                }),
            }
            pos += sdelta;
        }
    }
    Ok(entries)
}

// --- 3.11+ location entries

/// Header codes of the 3.11+ location entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PositionEntryKind {
    Short0 = 0,
    Short1 = 1,
    Short2 = 2,
    Short3 = 3,
    Short4 = 4,
    Short5 = 5,
    Short6 = 6,
    Short7 = 7,
    Short8 = 8,
    Short9 = 9,
    OneLine0 = 10,
    OneLine1 = 11,
    OneLine2 = 12,
    NoColumns = 13,
    Long = 14,
    None = 15,
}

const MAX_ENTRY_UNITS: usize = 8;

fn push_header(out: &mut Vec<u8>, kind: PositionEntryKind, units: usize) {
    debug_assert!((1..=MAX_ENTRY_UNITS).contains(&units));
    out.push(0x80 | ((kind as u8) << 3) | (units as u8 - 1));
}

fn encode_one(out: &mut Vec<u8>, loc: &InstrLocation, units: usize, prev_line: &mut i64) {
    let Some(line) = loc.lineno else {
        push_header(out, PositionEntryKind::None, units);
        return;
    };
    let line = i64::from(line);
    let line_delta = line - *prev_line;
    let end_line = loc.end_lineno.map_or(line, i64::from);
    let end_line_delta = end_line - line;

    match (loc.col_offset, loc.end_col_offset) {
        (Some(col), Some(end_col))
            if line_delta == 0
                && end_line_delta == 0
                && col < 80
                && end_col >= col
                && end_col - col < 16 =>
        {
            push_header(
                out,
                match col / 8 {
                    0 => PositionEntryKind::Short0,
                    1 => PositionEntryKind::Short1,
                    2 => PositionEntryKind::Short2,
                    3 => PositionEntryKind::Short3,
                    4 => PositionEntryKind::Short4,
                    5 => PositionEntryKind::Short5,
                    6 => PositionEntryKind::Short6,
                    7 => PositionEntryKind::Short7,
                    8 => PositionEntryKind::Short8,
                    _ => PositionEntryKind::Short9,
                },
                units,
            );
            out.push((((col % 8) as u8) << 4) | ((end_col - col) as u8));
        }
        (Some(col), Some(end_col))
            if (0..3).contains(&line_delta)
                && end_line_delta == 0
                && col < 128
                && end_col < 128 =>
        {
            let kind = match line_delta {
                0 => PositionEntryKind::OneLine0,
                1 => PositionEntryKind::OneLine1,
                _ => PositionEntryKind::OneLine2,
            };
            push_header(out, kind, units);
            out.push(col as u8);
            out.push(end_col as u8);
        }
        (None, None) if end_line_delta == 0 => {
            push_header(out, PositionEntryKind::NoColumns, units);
            write_location_signed_varint(out, line_delta as i32);
        }
        (col, end_col) => {
            // The long form encodes columns shifted by one so that zero can
            // stand for an absent column.
            push_header(out, PositionEntryKind::Long, units);
            write_location_signed_varint(out, line_delta as i32);
            write_location_varint(out, end_line_delta as u32);
            write_location_varint(out, col.map_or(0, |c| c + 1));
            write_location_varint(out, end_col.map_or(0, |c| c + 1));
        }
    }

    *prev_line = line;
}

/// Encode the 3.11+ table from one location per code unit.
///
/// The caller repeats an instruction's location for each of its code units
/// (`EXTENDED_ARG` prefixes and inline caches included); runs of the same
/// location collapse into entries of up to eight units.
pub fn encode_positions(first_lineno: u32, unit_locations: &[InstrLocation]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev_line = i64::from(first_lineno);

    for (loc, chunk) in &unit_locations.iter().chunk_by(|loc| **loc) {
        let mut remaining = chunk.count();
        while remaining > 0 {
            let units = remaining.min(MAX_ENTRY_UNITS);
            encode_one(&mut out, &loc, units, &mut prev_line);
            remaining -= units;
        }
    }

    out
}

/// Decode the 3.11+ table into `(code_units, location)` runs.
pub fn decode_positions(
    data: &[u8],
    first_lineno: u32,
) -> Result<Vec<(u32, InstrLocation)>, DecodeError> {
    let mut entries = Vec::new();
    let mut pos = 0;
    let mut line = i64::from(first_lineno);

    while pos < data.len() {
        let header = data[pos];
        if header & 0x80 == 0 {
            return Err(DecodeError::MalformedLineTable);
        }
        pos += 1;
        let code = (header >> 3) & 0x0f;
        let units = u32::from(header & 0x07) + 1;

        let location = match code {
            0..=9 => {
                let second = *data.get(pos).ok_or(DecodeError::MalformedLineTable)?;
                pos += 1;
                let col = u32::from(code) * 8 + u32::from(second >> 4);
                let end_col = col + u32::from(second & 0x0f);
                InstrLocation::span(line as u32, line as u32, col, end_col)
            }
            10..=12 => {
                line += i64::from(code) - 10;
                let col = *data.get(pos).ok_or(DecodeError::MalformedLineTable)?;
                let end_col = *data.get(pos + 1).ok_or(DecodeError::MalformedLineTable)?;
                pos += 2;
                InstrLocation::span(line as u32, line as u32, u32::from(col), u32::from(end_col))
            }
            13 => {
                line += i64::from(read_location_signed_varint(data, &mut pos)?);
                if line < 0 {
                    return Err(DecodeError::MalformedLineTable);
                }
                InstrLocation {
                    lineno: Some(line as u32),
                    end_lineno: Some(line as u32),
                    col_offset: None,
                    end_col_offset: None,
                }
            }
            14 => {
                line += i64::from(read_location_signed_varint(data, &mut pos)?);
                if line < 0 {
                    return Err(DecodeError::MalformedLineTable);
                }
                let end_line = line + i64::from(read_location_varint(data, &mut pos)?);
                let col = read_location_varint(data, &mut pos)?;
                let end_col = read_location_varint(data, &mut pos)?;
                InstrLocation {
                    lineno: Some(line as u32),
                    end_lineno: Some(end_line as u32),
                    col_offset: col.checked_sub(1),
                    end_col_offset: end_col.checked_sub(1),
                }
            }
            _ => InstrLocation::default(),
        };

        entries.push((units, location));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: u32, size: u32, line: impl Into<Option<u32>>) -> LineRecord {
        LineRecord {
            offset,
            size,
            line: line.into(),
        }
    }

    #[test]
    fn lnotab_round_trip() {
        let records = [
            record(0, 2, 1),
            record(2, 2, 1),
            record(4, 4, 2),
            record(8, 2, 5),
        ];
        let lnotab = encode_lnotab(1, &records);
        let entries = decode_lnotab(&lnotab, 1, 10).unwrap();
        assert_eq!(
            entries,
            vec![
                LineEntry { start: 0, end: 4, line: Some(1) },
                LineEntry { start: 4, end: 8, line: Some(2) },
                LineEntry { start: 8, end: 10, line: Some(5) },
            ]
        );
    }

    #[test]
    fn lnotab_saturates_large_line_jumps() {
        let records = [record(0, 2, 1), record(2, 2, 1000)];
        let lnotab = encode_lnotab(1, &records);
        // 999 = 127 * 7 + 110 needs eight pairs.
        assert!(lnotab.len() >= 16);
        let entries = decode_lnotab(&lnotab, 1, 4).unwrap();
        assert_eq!(entries.last().unwrap().line, Some(1000));
    }

    #[test]
    fn lnotab_negative_delta() {
        let records = [record(0, 2, 10), record(2, 2, 3)];
        let lnotab = encode_lnotab(10, &records);
        let entries = decode_lnotab(&lnotab, 10, 4).unwrap();
        assert_eq!(entries.last().unwrap().line, Some(3));
    }

    #[test]
    fn lnotab_large_byte_delta_uses_padding_pairs() {
        let records = [record(0, 2, 1), record(600, 2, 2)];
        let lnotab = encode_lnotab(1, &records);
        let entries = decode_lnotab(&lnotab, 1, 602).unwrap();
        assert_eq!(
            entries,
            vec![
                LineEntry { start: 0, end: 600, line: Some(1) },
                LineEntry { start: 600, end: 602, line: Some(2) },
            ]
        );
    }

    #[test]
    fn pair_table_round_trip() {
        let records = [
            record(0, 2, 3),
            record(2, 2, 3),
            record(4, 2, 1),
            record(6, 2, None),
            record(8, 2, 7),
        ];
        let table = encode_pairs(3, &records);
        let entries = decode_pairs(&table, 3).unwrap();
        assert_eq!(
            entries,
            vec![
                LineEntry { start: 0, end: 4, line: Some(3) },
                LineEntry { start: 4, end: 6, line: Some(1) },
                LineEntry { start: 6, end: 8, line: None },
                LineEntry { start: 8, end: 10, line: Some(7) },
            ]
        );
    }

    #[test]
    fn pair_table_negative_deltas() {
        let records = [record(0, 2, 500), record(2, 2, 2)];
        let table = encode_pairs(500, &records);
        let entries = decode_pairs(&table, 500).unwrap();
        assert_eq!(
            entries,
            vec![
                LineEntry { start: 0, end: 2, line: Some(500) },
                LineEntry { start: 2, end: 4, line: Some(2) },
            ]
        );
    }

    #[test]
    fn positions_short_form_round_trip() {
        let loc = InstrLocation::span(1, 1, 4, 9);
        let table = encode_positions(1, &[loc, loc, loc]);
        // Same location over three units packs into one entry.
        assert_eq!(table.len(), 2);
        assert_eq!(decode_positions(&table, 1).unwrap(), vec![(3, loc)]);
    }

    #[test]
    fn positions_one_line_and_long_forms() {
        let a = InstrLocation::span(1, 1, 4, 9);
        let b = InstrLocation::span(2, 2, 100, 120); // one-line, delta 1
        let c = InstrLocation::span(7, 9, 0, 4); // long: spans lines
        let d = InstrLocation {
            lineno: Some(9),
            end_lineno: Some(9),
            col_offset: None,
            end_col_offset: None,
        }; // no-columns
        let e = InstrLocation::default(); // none

        let units: Vec<InstrLocation> = vec![a, b, c, d, e];
        let table = encode_positions(1, &units);
        let decoded = decode_positions(&table, 1).unwrap();
        assert_eq!(
            decoded,
            vec![(1, a), (1, b), (1, c), (1, d), (1, e)]
        );
    }

    #[test]
    fn positions_entries_cap_at_eight_units() {
        let loc = InstrLocation::span(1, 1, 0, 3);
        let units = vec![loc; 11];
        let table = encode_positions(1, &units);
        let decoded = decode_positions(&table, 1).unwrap();
        assert_eq!(decoded, vec![(8, loc), (3, loc)]);
    }

    #[test]
    fn positions_negative_line_delta() {
        let a = InstrLocation::span(10, 10, 0, 1);
        let b = InstrLocation::span(2, 2, 0, 1);
        let table = encode_positions(10, &[a, b]);
        let decoded = decode_positions(&table, 10).unwrap();
        assert_eq!(decoded, vec![(1, a), (1, b)]);
    }

    #[test]
    fn truncated_positions_are_rejected() {
        let loc = InstrLocation::span(1, 1, 4, 9);
        let mut table = encode_positions(1, &[loc]);
        table.truncate(1);
        assert_eq!(
            decode_positions(&table, 1),
            Err(DecodeError::MalformedLineTable)
        );
    }
}
