// A DOS-compatible keyboard-layout and code-page engine. Parses
// .KL/.KCL keyboard layout files and .CPI/.CPX code-page files, and uses
// the parsed tables to translate raw scan-code events, qualified by
// shift/ctrl/alt/lock/user modifier state, into the character codes a
// legacy DOS program expects in its keyboard buffer. A secondary
// responsibility is installing the selected code page's screen font
// into the host's video font memory.
//
// The engine never touches a filesystem, a key buffer, or video memory
// directly; a host wires those up by implementing the traits in `host`
// and driving the functions below.

pub mod builtin;
pub mod codepage;
pub mod cpi;
pub mod error;
pub mod font;
pub mod host;
pub mod kcl;
pub mod kl;
pub mod layout;
pub mod reader;
pub mod session;

pub use error::{KeybError, KeybErrorKind, KeybStatus, Result};
pub use host::{FontSink, KeyEmitter, RealModeTrampoline, ResourceSource};
pub use session::Session;

// Mirrors the legacy load_layout entry point: a KeybError's `code()` is
// the KEYB_* status a caller expects back.
pub fn load_layout(
    session: &mut Session,
    resources: &dyn ResourceSource,
    trampoline: &mut dyn RealModeTrampoline,
    font_sink: &mut dyn FontSink,
    layout_name: &str,
    codepage_id: u16,
    codepage_file: &str,
) -> Result<()> {
    session.load(resources, trampoline, font_sink, layout_name, codepage_id, codepage_file)
}

pub fn switch_layout(
    session: &mut Session,
    resources: &dyn ResourceSource,
    trampoline: &mut dyn RealModeTrampoline,
    font_sink: &mut dyn FontSink,
    name: &str,
) -> Result<u16> {
    session.switch(resources, trampoline, font_sink, name)
}

// Never fails: unmapped scan codes and exhausted dead-key state fall
// through to pass-through, reported as false.
pub fn translate_key(
    session: &mut Session,
    scan: u8,
    flags1: u8,
    flags2: u8,
    flags3: u8,
    sink: &mut dyn KeyEmitter,
) -> bool {
    session.translate(scan, flags1, flags2, flags3, sink)
}

pub fn get_loaded_layout_name(session: &Session) -> &str {
    session.query_name()
}

pub fn shutdown(session: &mut Session, font_sink: &mut dyn FontSink) {
    session.teardown(font_sink);
}
