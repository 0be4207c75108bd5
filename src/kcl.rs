// Index over .KCL keyboard-library containers (component B). A .KCL
// file bundles many layouts' KL payloads behind a small directory of
// records. This module only locates the byte offset of the record
// matching a requested layout id: kl::parse_from_kcl_record does the
// actual KL parsing once an offset is found.

use crate::error::{KeybError, Result};
use crate::reader::ByteReader;

const KCL_MAGIC: [u8; 3] = [0x4B, 0x43, 0x46];

// One (lcnum, language code) entry parsed out of a record's directory
// bytes, used by locate() for matching.
struct RecordEntry {
    lcnum: u16,
    code: String,
}

// Finds the byte offset of the matching record's KL body (past the
// record header and its directory of ids, not the header itself).
//
// Matching is case-insensitive against each entry's textual code; if an
// entry's lcnum != 0, code ++ decimal(lcnum) is also tried. When
// first_id_only is true, only the first id in each record's directory is
// considered. The caller drives the two-pass precedence rule (an exact
// first-id hit beats a secondary-alias hit even across multiple
// candidate libraries) by calling this twice per library.
pub fn locate(library_bytes: &[u8], wanted_id: &str, first_id_only: bool) -> Result<Option<usize>> {
    let reader = ByteReader::new(library_bytes);
    let magic = reader.slice_at(0, 3, "KCL magic")?;
    if magic != KCL_MAGIC {
        return Err(KeybError::InvalidFile("KCL magic mismatch".to_string()));
    }
    let skip = reader.u8_at(6, "KCL skip count")? as usize;
    let mut offset = 7 + skip;

    while offset < library_bytes.len() {
        let len = reader.u16_at(offset, "KCL record header")? as usize;
        if len == 0 {
            break;
        }
        let data_len = reader.u8_at(offset + 2, "KCL record header")? as usize;
        let entries = parse_directory(&reader, offset + 5, data_len)?;

        let candidates: &[RecordEntry] = if first_id_only {
            &entries[..entries.len().min(1)]
        } else {
            &entries
        };
        if candidates.iter().any(|e| entry_matches(e, wanted_id)) {
            return Ok(Some(offset + 5 + data_len));
        }

        offset += 5 + len;
    }
    Ok(None)
}

fn entry_matches(entry: &RecordEntry, wanted_id: &str) -> bool {
    if entry.code.eq_ignore_ascii_case(wanted_id) {
        return true;
    }
    if entry.lcnum != 0 {
        let combined = format!("{}{}", entry.code, entry.lcnum);
        if combined.eq_ignore_ascii_case(wanted_id) {
            return true;
        }
    }
    false
}

fn parse_directory(reader: &ByteReader<'_>, start: usize, data_len: usize) -> Result<Vec<RecordEntry>> {
    let mut entries = Vec::new();
    let mut cursor = start;
    let end = start + data_len;
    while cursor < end {
        let lcnum = reader.u16_at(cursor, "KCL directory entry")?;
        let (code, next) = reader.comma_terminated_at(cursor + 2, "KCL directory entry")?;
        entries.push(RecordEntry {
            lcnum,
            code: String::from_utf8_lossy(code).to_string(),
        });
        cursor = next;
    }
    Ok(entries)
}

// The four on-disk KCL library file names, in precedence order, tried
// before the crate's embedded equivalents (crate::builtin).
pub const LIBRARY_FILE_NAMES: [&str; 4] = ["keyboard.sys", "keybrd2.sys", "keybrd3.sys", "keybrd4.sys"];
