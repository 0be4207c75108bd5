// Parser for .KL layout payloads (component C). A bare .KL file is
// magic(3) + skip(1) + payload; a payload extracted from a .KCL library
// record skips straight to the same payload layout two bytes past the
// record's own offset, since the KCL directory's data_len byte and the
// KL payload's own data_len byte land at different base offsets and must
// not be read through the same cursor. Both entry points converge on
// build_layout.

use crate::error::{KeybError, Result};
use crate::layout::{Layout, LayoutSource, PlanePredicate, COMMAND_PLANE, FLAG_PLANE, MAX_SCAN, NUM_PLANES};
use crate::reader::ByteReader;

const KL_MAGIC: [u8; 3] = [0x4B, 0x4C, 0x46];
const KEYBCB_HEADER: usize = 0x14;
const MAX_ADDITIONAL_PLANES: u8 = 8;

// Parses a standalone .KL file (magic + 1-byte skip + payload).
pub fn parse_bare_file(bytes: &[u8], requested_codepage: u16) -> Result<Layout> {
    let reader = ByteReader::new(bytes);
    let magic = reader.slice_at(0, 3, "KL magic")?;
    if magic != KL_MAGIC {
        return Err(KeybError::InvalidFile("KL magic mismatch".to_string()));
    }
    build_layout(bytes, 4, requested_codepage, None)
}

// Parses the KL payload embedded in a .KCL library at record_offset
// (the offset kcl::locate returned). No magic check: the payload begins
// two bytes past the record header.
pub fn parse_from_kcl_record(container: &[u8], record_offset: usize, requested_codepage: u16) -> Result<Layout> {
    let start_pos = record_offset
        .checked_add(2)
        .ok_or_else(|| KeybError::InvalidFile("KCL record offset overflow".to_string()))?;
    build_layout(container, start_pos, requested_codepage, None)
}

// Re-parses the layout's own stored KL payload forcing submapping
// specific_layout, in response to command code 120..140. Replaces the
// table-derived fields in place; name, language_codes, user_keys and
// use_foreign_layout are left untouched.
pub fn parse_submapping_into(layout: &mut Layout, specific_layout: u8) -> Result<()> {
    let payload = layout.source.kl_payload.clone();
    let requested_codepage = layout.source.requested_codepage;
    let rebuilt = build_layout(&payload, 0, requested_codepage, Some(specific_layout))?;
    layout.table = rebuilt.table;
    layout.plane_predicates = rebuilt.plane_predicates;
    layout.additional_planes = rebuilt.additional_planes;
    layout.used_lock_modifiers = rebuilt.used_lock_modifiers;
    layout.diacritics_table = rebuilt.diacritics_table;
    layout.diacritics_entries = rebuilt.diacritics_entries;
    Ok(())
}

fn build_layout(
    bytes: &[u8],
    start_pos: usize,
    requested_codepage: u16,
    specific_layout: Option<u8>,
) -> Result<Layout> {
    let reader = ByteReader::new(bytes);
    let data_len = reader.u8_at(start_pos, "KL data_len")? as usize;

    let mut language_codes = Vec::new();
    let mut cursor = start_pos + 1;
    let codes_end = start_pos + 1 + data_len;
    if codes_end > bytes.len() {
        return Err(KeybError::InvalidFile(
            "KL language-code list runs past end of buffer".to_string(),
        ));
    }
    while cursor < codes_end {
        let (code, next) = reader.comma_terminated_at(cursor, "KL language code")?;
        if next > codes_end + 1 {
            break;
        }
        if !code.is_empty() {
            language_codes.push(String::from_utf8_lossy(code).to_string());
        }
        cursor = next;
    }

    let p = start_pos + 1 + data_len;
    let submappings = reader.u8_at(p, "KL submappings count")? as usize;
    let additional_planes = reader.u8_at(p + 1, "KL additional_planes")?.min(MAX_ADDITIONAL_PLANES);

    let mut table = [[0u16; NUM_PLANES]; MAX_SCAN + 1];
    let mut diacritics_table = Vec::new();
    let mut diacritics_entries = 0usize;
    let mut accepted_any = false;

    for i in 0..submappings {
        let s = match specific_layout {
            Some(_) if i == 0 => 0usize,
            Some(forced) => forced as usize,
            None => i,
        };
        if s >= submappings {
            continue;
        }
        let desc_off = p + KEYBCB_HEADER + 8 * s;
        let submap_cp = reader.u16_at(desc_off, "KL submapping descriptor")?;
        let table_offset = reader.u16_at(desc_off + 2, "KL submapping descriptor")?;
        let diacritics_offset = reader.u16_at(desc_off + 4, "KL submapping descriptor")?;

        let is_exact = submap_cp == requested_codepage;
        let is_wildcard = s == 0 && submap_cp == 0;
        let is_forced = specific_layout == Some(s as u8);
        if !(is_exact || is_wildcard || is_forced) {
            continue;
        }
        accepted_any = true;

        if table_offset != 0 {
            install_key_table(&mut table, bytes, p + table_offset as usize, additional_planes)?;
        }
        if diacritics_offset != 0 {
            let (bytes_copy, entries) = read_diacritics_table(bytes, p + diacritics_offset as usize)?;
            diacritics_table = bytes_copy;
            diacritics_entries = entries;
        }
    }

    if specific_layout.is_none() && !accepted_any {
        return Err(KeybError::LayoutNotFound(format!(
            "no submapping matches code page {requested_codepage} and no wildcard submapping exists"
        )));
    }

    let plane_predicates = read_plane_predicates(&reader, p + KEYBCB_HEADER + 8 * submappings, additional_planes)?;
    let mut used_lock_modifiers: u16 = 0x0F;
    for pred in &plane_predicates {
        used_lock_modifiers |= pred.required_flags & 0x70;
    }

    Ok(Layout {
        name: String::new(),
        table,
        plane_predicates,
        additional_planes,
        used_lock_modifiers,
        diacritics_table,
        diacritics_entries,
        user_keys: 0,
        use_foreign_layout: true,
        language_codes,
        source: LayoutSource {
            kl_payload: bytes[start_pos..].to_vec(),
            requested_codepage,
        },
        ..Layout::identity()
    })
}

fn read_plane_predicates(reader: &ByteReader<'_>, offset: usize, additional_planes: u8) -> Result<Vec<PlanePredicate>> {
    let mut predicates = Vec::with_capacity(additional_planes as usize);
    for i in 0..additional_planes as usize {
        let base = offset + 8 * i;
        predicates.push(PlanePredicate {
            required_flags: reader.u16_at(base, "KL plane predicate")?,
            forbidden_flags: reader.u16_at(base + 2, "KL plane predicate")?,
            required_userflags: reader.u16_at(base + 4, "KL plane predicate")?,
            forbidden_userflags: reader.u16_at(base + 6, "KL plane predicate")?,
        });
    }
    Ok(predicates)
}

fn install_key_table(
    table: &mut [[u16; NUM_PLANES]; MAX_SCAN + 1],
    bytes: &[u8],
    mut cursor: usize,
    additional_planes: u8,
) -> Result<()> {
    let reader = ByteReader::new(bytes);
    let max_entries = additional_planes as usize + 2;
    loop {
        let scan = reader.u8_at(cursor, "KL key table record")?;
        if scan == 0 {
            break;
        }
        let flags_and_len = reader.u8_at(cursor + 1, "KL key table record")?;
        let command_bits = reader.u8_at(cursor + 2, "KL key table record")? as u16;
        let scan_length = (flags_and_len & 0x07) as usize + 1;
        let s_flag = flags_and_len & 0x80 != 0;
        let key_lock_flags = (flags_and_len >> 4) & 0x07;

        let entry_width = if s_flag { 2 } else { 1 };
        let entries_start = cursor + 3;
        let scan_masked = (scan & 0x7F) as usize;

        if scan_masked <= MAX_SCAN {
            let n_install = scan_length.min(max_entries);
            for e in 0..n_install {
                let off = entries_start + e * entry_width;
                let value = if s_flag {
                    reader.u16_at(off, "KL key table entry")?
                } else {
                    reader.u8_at(off, "KL key table entry")? as u16
                };
                table[scan_masked][e] = value;

                if e < 10 {
                    let bit = (command_bits >> e) & 1;
                    table[scan_masked][COMMAND_PLANE] =
                        (table[scan_masked][COMMAND_PLANE] & !(1 << e)) | (bit << e);
                }
            }
            let existing = table[scan_masked][FLAG_PLANE];
            let merged_low3 = (existing & 0x07).max((scan_length - 1) as u16);
            let new_high = ((key_lock_flags as u16) << 4) | if s_flag { 0x80 } else { 0 };
            let merged_high = (existing & 0xF0) | new_high;
            table[scan_masked][FLAG_PLANE] = merged_low3 | (merged_high & 0xF0);
        }

        cursor = entries_start + scan_length * entry_width;
        if cursor > bytes.len() {
            return Err(KeybError::InvalidFile(
                "KL key table record runs past end of buffer".to_string(),
            ));
        }
    }
    Ok(())
}

fn read_diacritics_table(bytes: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let reader = ByteReader::new(bytes);
    let mut cursor = start;
    let mut entries = 0usize;
    let limit = start + crate::layout::DIACRITICS_TABLE_SIZE;
    loop {
        if cursor - start >= crate::layout::DIACRITICS_TABLE_SIZE {
            break;
        }
        let lead = reader.u8_at(cursor, "KL diacritics table")?;
        if lead == 0 {
            cursor += 1;
            break;
        }
        let n = reader.u8_at(cursor + 1, "KL diacritics table")? as usize;
        let sub_table_end = cursor + 2 + 2 * n;
        if sub_table_end > bytes.len() || sub_table_end - start > crate::layout::DIACRITICS_TABLE_SIZE {
            return Err(KeybError::InvalidFile(
                "KL diacritics sub-table runs past its 2048-byte budget".to_string(),
            ));
        }
        cursor = sub_table_end;
        entries += 1;
    }
    let end = cursor.min(limit).min(bytes.len());
    Ok((bytes[start..end].to_vec(), entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_kl(requested_codepage_bytes: [u8; 2]) -> Vec<u8> {
        // magic + skip
        let mut v = vec![0x4B, 0x4C, 0x46, 0x00];
        // data_len = 0 (no language codes)
        v.push(0);
        // P starts here: submappings=1, additional_planes=0
        v.push(1); // submappings
        v.push(0); // additional_planes
        v.extend_from_slice(&[0u8; 0x12]); // pad to 0x14 header
        // descriptor 0: submap_cp, table_offset, diacritics_offset, reserved(2)
        v.extend_from_slice(&requested_codepage_bytes); // submap_cp
        v.extend_from_slice(&[0, 0]); // table_offset = 0 (absent)
        v.extend_from_slice(&[0, 0]); // diacritics_offset = 0
        v.extend_from_slice(&[0, 0]); // reserved
        v
    }

    #[test]
    fn wildcard_submapping_accepted_when_no_exact_match() {
        let bytes = minimal_kl([0, 0]);
        let layout = parse_bare_file(&bytes, 850).unwrap();
        assert!(layout.use_foreign_layout);
    }

    #[test]
    fn rejects_when_no_wildcard_and_no_match() {
        let bytes = minimal_kl([99, 0]);
        let err = parse_bare_file(&bytes, 850).unwrap_err();
        assert!(matches!(err, KeybError::LayoutNotFound(_)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_kl([0, 0]);
        bytes[0] = 0;
        let err = parse_bare_file(&bytes, 850).unwrap_err();
        assert!(matches!(err, KeybError::InvalidFile(_)));
    }
}
