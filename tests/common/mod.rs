//! Shared fixture builders and host test doubles for the integration
//! suite. Each `build_*_kl` function hand-assembles the exact byte
//! layout `keybcore::kl` expects, the same way the unit tests inside
//! that module do, just wired up to cover whole scenarios end to end.

use std::collections::HashMap;

use keybcore::{FontSink, RealModeTrampoline, ResourceSource};

pub use keybcore::host::BufferedKeyEmitter as Sink;

const KEYBCB_HEADER: usize = 0x14;

/// One scan code's key-table record: `command_bits` has one bit per
/// installed plane (bit 0 = plane 0, bit 1 = plane 1, ...); `entries` are
/// single-byte plane values installed starting at plane 0.
pub struct KeyRecord {
    pub scan: u8,
    pub command_bits: u8,
    pub entries: Vec<u8>,
}

/// One diacritic sub-table: `lead` is the standard fallback byte, `pairs`
/// are `(matched_literal, combined_output)`.
pub struct DiacriticTable {
    pub lead: u8,
    pub pairs: Vec<(u8, u8)>,
}

/// Assembles a minimal, well-formed `.KL` payload with a single
/// submapping, no additional planes, an optional key table and an
/// optional diacritics table.
pub fn build_kl(codepage: u16, records: &[KeyRecord], diacritics: &[DiacriticTable]) -> Vec<u8> {
    let mut out = vec![0x4B, 0x4C, 0x46, 0x00]; // magic + skip
    out.push(0); // data_len = 0, no language codes

    let p = out.len();
    out.push(1); // submappings = 1
    out.push(0); // additional_planes = 0
    out.extend_from_slice(&[0u8; KEYBCB_HEADER - 2]);

    let descriptor_offset = out.len();
    out.extend_from_slice(&[0u8; 8]); // descriptor filled in below
    debug_assert_eq!(descriptor_offset, p + KEYBCB_HEADER);

    let table_offset = if records.is_empty() {
        0u16
    } else {
        let rel = (out.len() - p) as u16;
        for rec in records {
            out.push(rec.scan);
            out.push((rec.entries.len() - 1) as u8); // flags_and_len: low3 = scan_length-1
            out.push(rec.command_bits);
            out.extend_from_slice(&rec.entries);
        }
        out.push(0); // terminator scan == 0
        rel
    };

    let diacritics_offset = if diacritics.is_empty() {
        0u16
    } else {
        let rel = (out.len() - p) as u16;
        for table in diacritics {
            out.push(table.lead);
            out.push(table.pairs.len() as u8);
            for (m, o) in &table.pairs {
                out.push(*m);
                out.push(*o);
            }
        }
        out.push(0); // terminating lead == 0
        rel
    };

    out[descriptor_offset..descriptor_offset + 2].copy_from_slice(&codepage.to_le_bytes());
    out[descriptor_offset + 2..descriptor_offset + 4].copy_from_slice(&table_offset.to_le_bytes());
    out[descriptor_offset + 4..descriptor_offset + 6].copy_from_slice(&diacritics_offset.to_le_bytes());
    out
}

/// A `ResourceSource` backed by an in-memory name → bytes map, standing
/// in for a host filesystem/blob-store in tests.
pub struct MapResources(pub HashMap<String, Vec<u8>>);

impl MapResources {
    pub fn new() -> Self {
        MapResources(HashMap::new())
    }
    pub fn with(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.0.insert(name.to_string(), bytes);
        self
    }
}

impl ResourceSource for MapResources {
    fn open(&self, name: &str) -> Option<Vec<u8>> {
        self.0.get(name).cloned()
    }
}

/// A trampoline whose decompression result is fixed ahead of time,
/// standing in for a real UPX unpacker or real-mode CPU.
pub struct StubTrampoline {
    pub decompressed: Option<Vec<u8>>,
}

impl RealModeTrampoline for StubTrampoline {
    fn run_upx_unpacker(&mut self, _payload: &[u8], _entry_patch_offset: usize) -> Option<Vec<u8>> {
        self.decompressed.clone()
    }
}

/// Records every font write and video-state query instead of touching
/// real adapter memory.
#[derive(Default)]
pub struct RecordingFontSink {
    pub writes: Vec<(u32, Vec<u8>)>,
    pub reload_count: u32,
    pub text_mode: bool,
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
