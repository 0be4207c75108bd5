// .CPI/.CPX code-page file parser and UPX trampoline (component E).
// Identifies a code-page file, optionally decompresses it through a
// host-supplied RealModeTrampoline, then walks the CPI code-page linked
// list for the font data matching a requested code page and drives
// crate::font to install it.

use crate::error::{KeybError, Result};
use crate::font;
use crate::host::{FontSink, RealModeTrampoline};
use crate::reader::ByteReader;

const CPI_MAGIC: [u8; 5] = [0xFF, b'F', b'O', b'N', b'T'];
const DRDOS_MAGIC: [u8; 5] = [0x7F, b'D', b'R', b'F', b'_'];
const UPX_MARKER: &[u8; 4] = b"UPX!";
const UPX_SCAN_WINDOW: usize = 100;
const MIN_UPX_VERSION: u8 = 10;
const UPX_ENTRY_PATCH_OFFSET: usize = 19;
const MAX_CPX_PAYLOAD: usize = 0xFE00;

// Conventional VGA/EGA ROM font slot addresses. The legacy host places
// the three built-in font heights at fixed offsets inside the BIOS ROM
// font area; a real integration supplies the genuine addresses through
// its own FontSink implementation. These are placeholders chosen to be
// distinct and stable across calls, not real BIOS addresses.
pub const FONT_ADDR_8_FIRST: u32 = 0xFA6E;
pub const FONT_ADDR_8_SECOND: u32 = 0xFA6E + 128 * 8;
pub const FONT_ADDR_14: u32 = 0xFA6E + 2 * 128 * 8;
pub const FONT_ADDR_16: u32 = 0xFA6E + 2 * 128 * 8 + 256 * 14;
// The 16-line font's "alternate list" byte, zeroed whenever that font is
// installed (the CPI format's 16-line entry carries one, unlike the 8-
// and 14-line entries).
pub const FONT_ADDR_16_ALT_LIST: u32 = FONT_ADDR_16 + 256 * 16;

// How a code-page file presented itself before any body parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Plain,
    UpxPacked { found_at_pos: usize },
}

// Identifies a raw file as plain CPI, rejects the DR-DOS variant, and
// otherwise requires a recognizable UPX marker with an acceptable
// version.
fn identify(bytes: &[u8]) -> Result<Kind> {
    let reader = ByteReader::new(bytes);
    if let Ok(magic) = reader.slice_at(0, 5, "CPI magic") {
        if magic == CPI_MAGIC {
            return Ok(Kind::Plain);
        }
        if magic == DRDOS_MAGIC {
            return Err(KeybError::InvalidCPFile(
                "DR-DOS CPI variant is not supported".to_string(),
            ));
        }
    }
    let window = &bytes[..bytes.len().min(UPX_SCAN_WINDOW)];
    let found_at_pos = window
        .windows(UPX_MARKER.len())
        .position(|w| w == UPX_MARKER)
        .ok_or_else(|| KeybError::InvalidCPFile("not a CPI file and no UPX marker found".to_string()))?;
    let version = *bytes
        .get(found_at_pos + UPX_MARKER.len())
        .ok_or_else(|| KeybError::InvalidCPFile("truncated UPX marker".to_string()))?;
    if version < MIN_UPX_VERSION {
        return Err(KeybError::InvalidCPFile(format!(
            "unsupported UPX version {version}"
        )));
    }
    Ok(Kind::UpxPacked { found_at_pos })
}

// Runs the UPX self-decompression trampoline over payload via the host's
// RealModeTrampoline, patching a far-return at found_at_pos + 19 as the
// legacy design requires before handing control to the host.
fn decompress(
    trampoline: &mut dyn RealModeTrampoline,
    payload: &[u8],
    found_at_pos: usize,
) -> Result<Vec<u8>> {
    if payload.len() > MAX_CPX_PAYLOAD {
        return Err(KeybError::InvalidCPFile(format!(
            "CPX payload of {} bytes exceeds the {:#x}-byte trampoline limit",
            payload.len(),
            MAX_CPX_PAYLOAD
        )));
    }
    let patch_offset = found_at_pos + UPX_ENTRY_PATCH_OFFSET;
    trampoline
        .run_upx_unpacker(payload, patch_offset)
        .ok_or_else(|| KeybError::InvalidCPFile("UPX decompression failed".to_string()))
}

// Loads a code-page file's bytes, decompressing through trampoline if
// UPX-packed, then installs the font for wanted_cp through font_sink.
// Returns the code-page id actually installed (always wanted_cp on
// success).
pub fn load(
    raw: &[u8],
    wanted_cp: u16,
    trampoline: &mut dyn RealModeTrampoline,
    font_sink: &mut dyn FontSink,
) -> Result<u16> {
    let cpi = match identify(raw)? {
        Kind::Plain => raw.to_vec(),
        Kind::UpxPacked { found_at_pos } => decompress(trampoline, raw, found_at_pos)?,
    };
    install_font(&cpi, wanted_cp, font_sink)
}

fn install_font(cpi: &[u8], wanted_cp: u16, font_sink: &mut dyn FontSink) -> Result<u16> {
    let reader = ByteReader::new(cpi);
    let mut start = reader.u32_at(0x13, "CPI code-page list pointer")? as usize;
    if start >= cpi.len() {
        return Err(KeybError::InvalidCPFile(
            "code-page list pointer out of range".to_string(),
        ));
    }

    let n_cp = reader.u16_at(start, "CPI code-page count")?;
    start += 4;

    for _ in 0..n_cp {
        let device_type = reader.u16_at(start + 0x04, "CPI entry device_type")?;
        let font_cp = reader.u16_at(start + 0x0E, "CPI entry font_cp")?;
        let hdr = reader.u32_at(start + 0x16, "CPI entry font header pointer")? as usize;
        let font_type = reader.u16_at(hdr, "CPI font_type")?;

        if device_type == 1 && font_type == 1 && font_cp == wanted_cp {
            install_fonts_at(&reader, hdr, font_sink)?;
            if font_sink.in_text_mode() {
                font_sink.reload_fonts();
            }
            font_sink.recompute_rom_checksum();
            return Ok(wanted_cp);
        }

        let next = reader.u32_at(start, "CPI next-entry pointer")? as usize;
        let next = next
            .checked_add(2)
            .ok_or_else(|| KeybError::InvalidCPFile("next-entry pointer overflow".to_string()))?;
        if next <= start || next >= cpi.len() {
            return Err(KeybError::InvalidCPFile(
                "code-page chain is non-increasing or out of bounds".to_string(),
            ));
        }
        start = next;
    }
    Err(KeybError::InvalidCPFile(format!(
        "no code-page entry matches requested code page {wanted_cp}"
    )))
}

fn install_fonts_at(reader: &ByteReader<'_>, hdr: usize, font_sink: &mut dyn FontSink) -> Result<()> {
    let n_fonts = reader.u16_at(hdr + 2, "CPI font table n_fonts")?;
    let mut data = hdr + 6;
    for _ in 0..n_fonts {
        let h = reader.u8_at(data, "CPI font height byte")?;
        data += 6;
        match h {
            0x10 => {
                let bytes = reader.slice_at(data, 256 * 16, "CPI 16-line font data")?;
                font::install(font_sink, FONT_ADDR_16, bytes);
                font::install(font_sink, FONT_ADDR_16_ALT_LIST, &[0]);
            }
            0x0E => {
                let bytes = reader.slice_at(data, 256 * 14, "CPI 14-line font data")?;
                font::install(font_sink, FONT_ADDR_14, bytes);
            }
            0x08 => {
                let bytes = reader.slice_at(data, 128 * 8, "CPI 8-line font data")?;
                font::install(font_sink, FONT_ADDR_8_FIRST, bytes);
                font::install(font_sink, FONT_ADDR_8_SECOND, bytes);
            }
            _ => {}
        }
        data += h as usize * 256;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTrampoline;
    impl RealModeTrampoline for NullTrampoline {
        fn run_upx_unpacker(&mut self, _payload: &[u8], _entry_patch_offset: usize) -> Option<Vec<u8>> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingFontSink {
        writes: Vec<(u32, Vec<u8>)>,
        reload_count: u32,
        text_mode: bool,
    }
    impl FontSink for RecordingFontSink {
        fn write_font_bytes(&mut self, address: u32, bytes: &[u8]) {
            self.writes.push((address, bytes.to_vec()));
        }
        fn reload_fonts(&mut self) {
            self.reload_count += 1;
        }
        fn recompute_rom_checksum(&mut self) {}
        fn in_text_mode(&self) -> bool {
            self.text_mode
        }
    }

    fn minimal_cpi(codepage_id: u16) -> Vec<u8> {
        let mut out = vec![0u8; 0x17];
        out[0..5].copy_from_slice(&CPI_MAGIC);
        let list_start = 0x17u32;
        out[0x13..0x17].copy_from_slice(&list_start.to_le_bytes());

        let mut list = Vec::new();
        list.extend_from_slice(&1u16.to_le_bytes());
        list.extend_from_slice(&[0u8; 2]);

        let entry_start = list.len() as u32 + list_start;
        list.extend_from_slice(&0u32.to_le_bytes()); // next pointer, unused (single entry)
        list.extend_from_slice(&[0u8; 2]);
        list[4..6].copy_from_slice(&1u16.to_le_bytes()); // device_type = 1
        list.extend_from_slice(&[0u8; 8]);
        list[0x0E..0x10].copy_from_slice(&codepage_id.to_le_bytes());
        list.extend_from_slice(&[0u8; 2]);
        let hdr_offset = entry_start + 0x1A;
        list[0x16..0x1A].copy_from_slice(&hdr_offset.to_le_bytes());

        let mut fonts = Vec::new();
        fonts.extend_from_slice(&1u16.to_le_bytes()); // font_type
        fonts.extend_from_slice(&1u16.to_le_bytes()); // n_fonts
        fonts.push(0x08);
        fonts.extend_from_slice(&[0u8; 5]);
        fonts.extend(std::iter::repeat(0x42).take(128 * 8));
        list.extend_from_slice(&fonts);

        out.extend_from_slice(&list);
        out
    }

    #[test]
    fn loads_plain_cpi_and_writes_font() {
        let bytes = minimal_cpi(850);
        let mut trampoline = NullTrampoline;
        let mut sink = RecordingFontSink::default();
        let cp = load(&bytes, 850, &mut trampoline, &mut sink).unwrap();
        assert_eq!(cp, 850);
        assert_eq!(sink.writes.len(), 2); // first + second 8-line pages
        assert!(sink.writes.iter().all(|(_, b)| b.len() == 128 * 8));
    }

    #[test]
    fn rejects_drdos_variant() {
        let mut bytes = minimal_cpi(850);
        bytes[0..5].copy_from_slice(&DRDOS_MAGIC);
        let mut trampoline = NullTrampoline;
        let mut sink = RecordingFontSink::default();
        let err = load(&bytes, 850, &mut trampoline, &mut sink).unwrap_err();
        assert!(matches!(err, KeybError::InvalidCPFile(_)));
    }

    #[test]
    fn rejects_unmatched_codepage() {
        let bytes = minimal_cpi(850);
        let mut trampoline = NullTrampoline;
        let mut sink = RecordingFontSink::default();
        let err = load(&bytes, 437, &mut trampoline, &mut sink).unwrap_err();
        assert!(matches!(err, KeybError::InvalidCPFile(_)));
    }

    #[test]
    fn rejects_non_cpi_without_upx_marker() {
        let bytes = vec![0u8; 32];
        let mut trampoline = NullTrampoline;
        let mut sink = RecordingFontSink::default();
        let err = load(&bytes, 437, &mut trampoline, &mut sink).unwrap_err();
        assert!(matches!(err, KeybError::InvalidCPFile(_)));
    }
}
