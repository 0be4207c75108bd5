// Layout session manager (component G): load, switch (with rollback),
// query, and teardown. Session is the only place that owns a Layout for
// longer than a single call. Every mutating operation is atomic with
// respect to translate_key: either a replacement fully succeeds, or the
// session is left exactly as it was found.

use crate::error::{KeybError, Result};
use crate::host::{FontSink, KeyEmitter, RealModeTrampoline, ResourceSource};
use crate::layout::Layout;
use crate::{builtin, codepage, cpi, kcl, kl};

const DEFAULT_CODEPAGE: u16 = 437;

// The active layout and loaded code-page id, plus enough bookkeeping to
// roll a failed load/switch back to the previous good state.
pub struct Session {
    layout: Layout,
    codepage_id: u16,
    codepage_file_name: String,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            layout: Layout::identity(),
            codepage_id: DEFAULT_CODEPAGE,
            codepage_file_name: default_codepage_file_name(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    // Loads layout_name at codepage_id, parsing its KL file (falling back
    // to the bundled KCL libraries) and then its code-page file (falling
    // back to the built-in blob for codepage_id). Replaces the session
    // only once both steps succeed.
    pub fn load(
        &mut self,
        resources: &dyn ResourceSource,
        trampoline: &mut dyn RealModeTrampoline,
        font_sink: &mut dyn FontSink,
        layout_name: &str,
        codepage_id: u16,
        codepage_file_name: &str,
    ) -> Result<()> {
        let layout = load_kl(resources, layout_name, codepage_id)?;
        load_codepage(resources, trampoline, font_sink, codepage_id, codepage_file_name)?;
        self.layout = layout;
        self.codepage_id = codepage_id;
        self.codepage_file_name = codepage_file_name.to_string();
        Ok(())
    }

    // Switches the active layout. Three outcomes, cheapest first:
    // - new_layout starts with "US" (case-insensitive): flips to
    //   pass-through without touching the code page.
    // - new_layout is one of the current layout's own language codes:
    //   flips use_foreign_layout back on, same tables, same code page.
    // - Otherwise: parses a fresh layout for new_layout at the session's
    //   current code page and reloads that code page's font; only
    //   replaces the session if both succeed.
    pub fn switch(
        &mut self,
        resources: &dyn ResourceSource,
        trampoline: &mut dyn RealModeTrampoline,
        font_sink: &mut dyn FontSink,
        new_layout: &str,
    ) -> Result<u16> {
        if new_layout.len() >= 2 && new_layout[..2].eq_ignore_ascii_case("US") {
            self.layout.use_foreign_layout = false;
            return Ok(self.codepage_id);
        }
        if self
            .layout
            .language_codes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(new_layout))
        {
            self.layout.use_foreign_layout = true;
            return Ok(self.codepage_id);
        }

        let layout = load_kl(resources, new_layout, self.codepage_id)?;
        load_codepage(
            resources,
            trampoline,
            font_sink,
            self.codepage_id,
            &self.codepage_file_name,
        )?;
        self.layout = layout;
        Ok(self.codepage_id)
    }

    // Delegates to the layout runtime. Never fails: unmapped scan codes or
    // exhausted dead-key state simply report false.
    pub fn translate(&mut self, scan: u8, flags1: u8, flags2: u8, flags3: u8, sink: &mut dyn KeyEmitter) -> bool {
        self.layout.translate(scan, flags1, flags2, flags3, sink)
    }

    // Current layout name, or "none" while pass-through.
    pub fn query_name(&self) -> &str {
        if self.layout.use_foreign_layout {
            &self.layout.name
        } else {
            "none"
        }
    }

    pub fn codepage_id(&self) -> u16 {
        self.codepage_id
    }

    // Restores the US code page if a foreign one is loaded, and drops the
    // active layout back to pass-through.
    pub fn teardown(&mut self, font_sink: &mut dyn FontSink) {
        if self.codepage_id != DEFAULT_CODEPAGE && font_sink.in_text_mode() {
            font_sink.reload_fonts();
            self.codepage_id = DEFAULT_CODEPAGE;
        }
        self.layout = Layout::identity();
    }
}

fn default_codepage_file_name() -> String {
    "EGA.CPX".to_string()
}

// Opens layout_name's KL file directly, or failing that searches the
// four on-disk KCL libraries followed by the crate's four embedded
// library blobs, all at the same precedence (spec: "keyboard.sys,
// keybrd2.sys, keybrd3.sys, keybrd4.sys, then four built-in byte-vector
// equivalents"). A library that isn't present on disk is skipped
// outright rather than replaced in place by its built-in counterpart, so
// the built-ins are reached even when every on-disk file exists but
// none contains the requested id.
//
// Candidates are searched in two full passes: first_id_only=true across
// all of them, then first_id_only=false across all of them, so an exact
// primary-id hit in a later library still beats a secondary-alias hit in
// an earlier one.
fn load_kl(resources: &dyn ResourceSource, layout_name: &str, codepage_id: u16) -> Result<Layout> {
    if layout_name.eq_ignore_ascii_case("none") {
        return Ok(Layout::identity());
    }
    if let Some(bytes) = resources.open(&format!("{layout_name}.KL")) {
        let mut layout = kl::parse_bare_file(&bytes, codepage_id)?;
        layout.name = layout_name.to_string();
        return Ok(layout);
    }

    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for file_name in kcl::LIBRARY_FILE_NAMES.iter() {
        if let Some(bytes) = resources.open(file_name) {
            candidates.push(bytes);
        }
    }
    candidates.extend(builtin::builtin_kcl_libraries());

    for first_id_only in [true, false] {
        for library in &candidates {
            if let Some(offset) = kcl::locate(library, layout_name, first_id_only)? {
                let mut layout = kl::parse_from_kcl_record(library, offset, codepage_id)?;
                layout.name = layout_name.to_string();
                return Ok(layout);
            }
        }
    }

    Err(KeybError::FileNotFound(format!(
        "no KL file or KCL library entry for layout '{layout_name}'"
    )))
}

// Opens codepage_file_name directly, or its .CPI/.CPX extension swap,
// falling back to the built-in blob for codepage_id when neither exists
// on disk.
fn load_codepage(
    resources: &dyn ResourceSource,
    trampoline: &mut dyn RealModeTrampoline,
    font_sink: &mut dyn FontSink,
    codepage_id: u16,
    codepage_file_name: &str,
) -> Result<()> {
    let bytes = match resources.open(codepage_file_name) {
        Some(bytes) => bytes,
        None => match resources.open(&swap_extension(codepage_file_name)) {
            Some(bytes) => bytes,
            None => {
                let idx = codepage::builtin_index(codepage_id).ok_or_else(|| {
                    KeybError::InvalidCPFile(format!("code page {codepage_id} has no built-in font blob"))
                })?;
                builtin::builtin_cpi_blob(codepage::BUILTIN_CODEPAGE_IDS[idx]).ok_or_else(|| {
                    KeybError::InvalidCPFile(format!("code page {codepage_id} has no built-in font blob"))
                })?
            }
        },
    };
    cpi::load(&bytes, codepage_id, trampoline, font_sink)?;
    Ok(())
}

fn swap_extension(file_name: &str) -> String {
    if file_name.to_ascii_uppercase().ends_with(".CPI") {
        format!("{}.CPX", &file_name[..file_name.len() - 4])
    } else if file_name.to_ascii_uppercase().ends_with(".CPX") {
        format!("{}.CPI", &file_name[..file_name.len() - 4])
    } else {
        file_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferedKeyEmitter;
    use std::collections::HashMap;

    struct MapResources(HashMap<String, Vec<u8>>);
    impl ResourceSource for MapResources {
        fn open(&self, name: &str) -> Option<Vec<u8>> {
            self.0.get(name).cloned()
        }
    }

    struct NullTrampoline;
    impl RealModeTrampoline for NullTrampoline {
        fn run_upx_unpacker(&mut self, _payload: &[u8], _entry_patch_offset: usize) -> Option<Vec<u8>> {
            None
        }
    }

    #[derive(Default)]
    struct NullFontSink;
    impl FontSink for NullFontSink {
        fn write_font_bytes(&mut self, _address: u32, _bytes: &[u8]) {}
        fn reload_fonts(&mut self) {}
        fn recompute_rom_checksum(&mut self) {}
        fn in_text_mode(&self) -> bool {
            true
        }
    }

    #[test]
    fn starts_pass_through() {
        let session = Session::new();
        assert_eq!(session.query_name(), "none");
        assert_eq!(session.codepage_id(), DEFAULT_CODEPAGE);
    }

    #[test]
    fn switch_to_us_is_pass_through() {
        let mut session = Session::new();
        let resources = MapResources(HashMap::new());
        let mut trampoline = NullTrampoline;
        let mut font_sink = NullFontSink;
        let cp = session.switch(&resources, &mut trampoline, &mut font_sink, "US").unwrap();
        assert_eq!(cp, DEFAULT_CODEPAGE);
        assert_eq!(session.query_name(), "none");
    }

    #[test]
    fn load_missing_layout_reports_file_not_found() {
        let mut session = Session::new();
        let resources = MapResources(HashMap::new());
        let mut trampoline = NullTrampoline;
        let mut font_sink = NullFontSink;
        let err = session
            .load(&resources, &mut trampoline, &mut font_sink, "zz", 437, "EGA.CPX")
            .unwrap_err();
        assert!(matches!(err, KeybError::FileNotFound(_)));
        // session left untouched on failure
        assert_eq!(session.query_name(), "none");
    }

    #[test]
    fn translate_on_pass_through_session_is_inert() {
        let mut session = Session::new();
        let mut sink = BufferedKeyEmitter::default();
        let handled = session.translate(0x1E, 0, 0, 0, &mut sink);
        assert!(!handled);
        assert!(sink.keys.is_empty());
    }
}
