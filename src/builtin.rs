// Embedded fallback resources (component J). Real DOS keyboard/code-page
// blobs are vendor binaries this crate does not redistribute; the
// constructors here synthesize minimal, byte-exact-to-the-format stand-ins
// so the fallback code paths in crate::kcl, crate::kl and crate::cpi have
// something to parse in tests and in a host that hasn't supplied real
// files. A real deployment replaces these with include_bytes! of the
// genuine KEYBOARD.SYS/EGA.CPX contents at the same call sites.

use crate::codepage::BUILTIN_CODEPAGE_IDS;

// The four built-in KCL-library equivalents, tried after the on-disk
// keyboard.sys..keybrd4.sys candidates. Each is a minimal, well-formed
// empty KCL container; a real build embeds the genuine compiled-in
// libraries here instead.
pub fn builtin_kcl_libraries() -> [Vec<u8>; 4] {
    [empty_kcl(), empty_kcl(), empty_kcl(), empty_kcl()]
}

fn empty_kcl() -> Vec<u8> {
    // magic "KCF", skip byte = 0, no records (first record's `len` reads
    // as 0 and `locate` stops immediately).
    vec![0x4B, 0x43, 0x46, 0, 0, 0, 0, 0, 0]
}

// Synthesizes a minimal, valid, uncompressed CPI file carrying a single
// display-device, 8x8/14x8/16x8 font entry for codepage_id. Returns None
// for code pages outside the built-in eighteen.
pub fn builtin_cpi_blob(codepage_id: u16) -> Option<Vec<u8>> {
    if !BUILTIN_CODEPAGE_IDS.contains(&codepage_id) {
        return None;
    }
    Some(synthesize_cpi(codepage_id))
}

fn synthesize_cpi(codepage_id: u16) -> Vec<u8> {
    // Layout matches crate::cpi::load's parse exactly enough to
    // round-trip: header magic, a u32 pointer
    // to the code-page-entry list at offset 0x13, one entry with
    // device_type=1 (display), font_type=1, and 8/14/16-line fonts
    // filled with a recognizable repeating pattern rather than real
    // glyphs.
    let mut out = vec![0u8; 0x17];
    out[0..5].copy_from_slice(&[0xFF, b'F', b'O', b'N', b'T']);
    let list_start = 0x17u32;
    out[0x13..0x17].copy_from_slice(&list_start.to_le_bytes());

    let mut list = Vec::new();
    list.extend_from_slice(&1u16.to_le_bytes()); // n_cp
    list.extend_from_slice(&[0u8; 2]); // pad to entry start (start+=4 semantics)

    let entry_start = list.len() as u32 + list_start;
    let next_ptr = 0u32; // no further entries
    let hdr_offset = entry_start + 0x1A;

    list.extend_from_slice(&next_ptr.to_le_bytes()); // [0x00] next pointer
    list.extend_from_slice(&[0u8; 2]); // [0x04..0x06)? placeholder to reach device_type at +4
    list[4..6].copy_from_slice(&1u16.to_le_bytes()); // device_type = display
    list.extend_from_slice(&[0u8; 8]);
    list[0x0E..0x10].copy_from_slice(&codepage_id.to_le_bytes());
    list.extend_from_slice(&[0u8; 2]);
    list[0x16..0x1A].copy_from_slice(&hdr_offset.to_le_bytes());

    let mut fonts = Vec::new();
    fonts.extend_from_slice(&1u16.to_le_bytes()); // font_type = 1
    fonts.extend_from_slice(&3u16.to_le_bytes()); // n_fonts
    fonts.push(0x08);
    fonts.extend_from_slice(&[0u8; 5]);
    fonts.extend(std::iter::repeat(0xAA).take(128 * 8));
    fonts.push(0x0E);
    fonts.extend_from_slice(&[0u8; 5]);
    fonts.extend(std::iter::repeat(0xBB).take(256 * 14));
    fonts.push(0x10);
    fonts.extend_from_slice(&[0u8; 5]);
    fonts.extend(std::iter::repeat(0xCC).take(256 * 16));

    list.extend_from_slice(&fonts);

    out.extend_from_slice(&list);
    out
}
