// Font installer (component F). Deliberately the thinnest module in the
// crate: crate::cpi already knows which bytes go where, so this only
// forwards them through the host's FontSink, keeping the CPI parser
// testable against a plain byte-array sink without any video-adapter
// knowledge of its own.

use crate::host::FontSink;

// A byte-at-a-time phys_writeb loop and one whole-slice call are
// equivalent from the sink's point of view; write_font_bytes exists to
// express the latter directly.
pub fn install(sink: &mut dyn FontSink, address: u32, bytes: &[u8]) {
    sink.write_font_bytes(address, bytes);
}
