// The layout data model and the per-keystroke runtime (component D):
// plane selection, the dead-key state machine, and command dispatch. A
// Layout is populated once by the KL parser (crate::kl) and then driven,
// scan code by scan code, through Layout::translate. Nothing in this
// module performs file I/O; it only evaluates the tables the parser
// already built.

use crate::host::KeyEmitter;

// Largest scan code the BIOS emits that this engine will translate.
pub const MAX_SCAN: usize = 0x60;
// Twelve parallel planes per scan code: 0 normal, 1 shift, 2..9 user
// planes, 10 the command-bit row, 11 the per-key flag row.
pub const NUM_PLANES: usize = 12;
pub const COMMAND_PLANE: usize = 10;
pub const FLAG_PLANE: usize = 11;
pub const MAX_ADDITIONAL_PLANES: u8 = 8;
pub const DIACRITICS_TABLE_SIZE: usize = 2048;

const SCAN_CTRL: u8 = 0x1D;
const SCAN_SHIFT_L: u8 = 0x2A;
const SCAN_SHIFT_R: u8 = 0x36;
const SCAN_ALT: u8 = 0x38;
const SCAN_CAPS: u8 = 0x3A;
const SCAN_NUM: u8 = 0x45;
const SCAN_SCROLL: u8 = 0x46;

fn is_modifier_scan(scan: u8) -> bool {
    matches!(
        scan,
        SCAN_CTRL | SCAN_SHIFT_L | SCAN_SHIFT_R | SCAN_ALT | SCAN_CAPS | SCAN_NUM | SCAN_SCROLL
    )
}

// The four 16-bit masks that gate one additional (non-shift) plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanePredicate {
    pub required_flags: u16,
    pub forbidden_flags: u16,
    pub required_userflags: u16,
    pub forbidden_userflags: u16,
}

// The raw KL payload a layout was built from, kept around so that
// command code 120..140 (switch submapping) can re-parse in place
// without going back to the host's resource source.
#[derive(Debug, Clone, Default)]
pub struct LayoutSource {
    pub kl_payload: Vec<u8>,
    pub requested_codepage: u16,
}

// One fully-parsed keyboard layout, or the pass-through identity layout
// (name == "none").
#[derive(Debug, Clone)]
pub struct Layout {
    pub name: String,
    pub table: [[u16; NUM_PLANES]; MAX_SCAN + 1],
    pub plane_predicates: Vec<PlanePredicate>,
    pub additional_planes: u8,
    pub used_lock_modifiers: u16,
    pub diacritics_table: Vec<u8>,
    pub diacritics_entries: usize,
    pub(crate) diacritics_character: u8,
    pub user_keys: u8,
    pub use_foreign_layout: bool,
    pub language_codes: Vec<String>,
    pub source: LayoutSource,
}

impl Default for Layout {
    fn default() -> Self {
        Layout::identity()
    }
}

impl Layout {
    // The "US" / pass-through layout: no table, no translation.
    pub fn identity() -> Self {
        Layout {
            name: "none".to_string(),
            table: [[0u16; NUM_PLANES]; MAX_SCAN + 1],
            plane_predicates: Vec::new(),
            additional_planes: 0,
            used_lock_modifiers: 0x0F,
            diacritics_table: Vec::new(),
            diacritics_entries: 0,
            diacritics_character: 0,
            user_keys: 0,
            use_foreign_layout: false,
            language_codes: Vec::new(),
            source: LayoutSource::default(),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.name == "none" || !self.use_foreign_layout
    }

    pub fn has_pending_diacritic(&self) -> bool {
        self.diacritics_character > 0
    }

    // One scan-code-with-modifiers event. Returns whether the key was
    // handled by this layout (and thus should not also be treated as
    // pass-through by the caller).
    pub fn translate(
        &mut self,
        scan: u8,
        flags1: u8,
        flags2: u8,
        flags3: u8,
        sink: &mut dyn KeyEmitter,
    ) -> bool {
        if scan as usize > MAX_SCAN || !self.use_foreign_layout {
            return false;
        }
        let key_flags = self.table[scan as usize][FLAG_PLANE];
        let is_keypair = key_flags & 0x80 != 0;

        if (flags1 as u16 & self.used_lock_modifiers & 0x7C) == 0 && (flags3 & 2) == 0 {
            let shift_active = (flags1 & 0x01) | ((flags1 >> 1) & 0x01);
            let caps_effect = ((key_flags as u8 & 0x40) & (flags1 & 0x40)) >> 6;
            let plane = if (shift_active ^ caps_effect) != 0 { 1 } else { 0 };
            let entry = self.table[scan as usize][plane];
            if entry != 0 {
                self.dispatch(scan, entry, plane, is_keypair, sink);
                return true;
            }
        }

        let current_flags: u16 = (flags1 as u16 & 0x7F)
            | (((flags2 as u16 & 0x03) | ((flags3 as u16 & 0x0C))) << 8)
            | if flags1 & 0x03 != 0 { 0x4000 } else { 0 }
            | if flags3 & 2 != 0 { 0x1000 } else { 0 };

        for p in 0..self.additional_planes as usize {
            let pred = match self.plane_predicates.get(p) {
                Some(pred) => pred,
                None => break,
            };
            let flags_ok = (current_flags & pred.required_flags) == pred.required_flags
                && (current_flags & pred.forbidden_flags) == 0;
            let userflags_ok = (self.user_keys as u16 & pred.required_userflags)
                == pred.required_userflags
                && (self.user_keys as u16 & pred.forbidden_userflags) == 0;
            if flags_ok && userflags_ok {
                let entry = self.table[scan as usize][2 + p];
                if entry != 0 {
                    self.dispatch(scan, entry, 2 + p, is_keypair, sink);
                    return true;
                }
                break;
            }
        }

        if self.has_pending_diacritic() && !is_modifier_scan(scan) {
            self.diacritics_character = 0;
            return true;
        }

        false
    }

    fn dispatch(&mut self, scan: u8, entry: u16, plane: usize, is_keypair: bool, sink: &mut dyn KeyEmitter) {
        let is_command = plane < 10 && (self.table[scan as usize][COMMAND_PLANE] & (1 << plane)) != 0;
        self.map_key(scan, entry, is_command, is_keypair, sink);
    }

    fn map_key(&mut self, scan: u8, entry: u16, is_command: bool, is_pair: bool, sink: &mut dyn KeyEmitter) {
        if is_command {
            let c = (entry & 0xFF) as u16;
            match c {
                120..=139 => self.begin_submapping_switch(c as u8 - 119),
                180..=187 => self.user_keys &= !(1 << (c - 180)),
                188..=195 => self.user_keys |= 1 << (c - 188),
                200..=234 => {
                    let idx = (c - 200) as usize;
                    if idx < self.diacritics_entries {
                        self.diacritics_character = c as u8;
                    } else {
                        self.diacritics_character = 0;
                    }
                }
                160 => {}
                _ => {}
            }
            return;
        }

        if self.has_pending_diacritic() {
            let lead_command = self.diacritics_character;
            self.diacritics_character = 0;
            let sub_index = (lead_command as usize).saturating_sub(200);
            let emitted = self.lookup_diacritic(sub_index, (entry & 0xFF) as u8);
            sink.enqueue(((scan as u16) << 8) | emitted as u16);
            return;
        }

        if is_pair {
            sink.enqueue(entry);
        } else {
            sink.enqueue(((scan as u16) << 8) | (entry & 0xFF));
        }
    }

    // Walks sub_index sub-tables into diacritics_table, then scans that
    // sub-table's pairs for one whose lead byte equals literal. Falls
    // back to the sub-table's own lead byte when nothing matches.
    fn lookup_diacritic(&self, sub_index: usize, literal: u8) -> u8 {
        let table = &self.diacritics_table;
        let mut pos = 0usize;
        for _ in 0..sub_index {
            if pos + 1 >= table.len() {
                return literal;
            }
            let n = table[pos + 1] as usize;
            pos += 2 + 2 * n;
            if pos > table.len() {
                return literal;
            }
        }
        if pos + 1 >= table.len() {
            return literal;
        }
        let lead = table[pos];
        let n = table[pos + 1] as usize;
        let pairs_start = pos + 2;
        for j in 0..n {
            let off = pairs_start + 2 * j;
            if off + 1 >= table.len() {
                break;
            }
            if table[off] == literal {
                return table[off + 1];
            }
        }
        lead
    }

    fn begin_submapping_switch(&mut self, specific_layout: u8) {
        if self.source.kl_payload.is_empty() {
            return;
        }
        match crate::kl::parse_submapping_into(self, specific_layout) {
            Ok(()) => {
                log::debug!(
                    "layout '{}': switched to submapping {}",
                    self.name,
                    specific_layout
                );
            }
            Err(e) => {
                log::warn!(
                    "layout '{}': submapping switch to {} failed: {}",
                    self.name,
                    specific_layout,
                    e
                );
            }
        }
    }
}
