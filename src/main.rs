// keybctl: a small command-line harness around keybcore, useful for
// poking at a layout file without a full emulator. Loads a layout and
// code page from a directory and replays scan codes typed on stdin.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use keybcore::host::BufferedKeyEmitter;
use keybcore::{FontSink, RealModeTrampoline, ResourceSource, Session};

struct DirResources {
    root: PathBuf,
}

impl ResourceSource for DirResources {
    fn open(&self, name: &str) -> Option<Vec<u8>> {
        fs::read(self.root.join(name)).ok()
    }
}

// No emulated CPU to decompress UPX payloads on here; packed .CPX files
// are rejected rather than silently mis-handled.
struct NoTrampoline;
impl RealModeTrampoline for NoTrampoline {
    fn run_upx_unpacker(&mut self, _payload: &[u8], _entry_patch_offset: usize) -> Option<Vec<u8>> {
        None
    }
}

// No video adapter here; font writes are discarded.
struct NullFontSink;
impl FontSink for NullFontSink {
    fn write_font_bytes(&mut self, _address: u32, _bytes: &[u8]) {}
    fn reload_fonts(&mut self) {}
    fn recompute_rom_checksum(&mut self) {}
    fn in_text_mode(&self) -> bool {
        false
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: keybctl <resource-dir> <layout-name> [codepage]");
        std::process::exit(1);
    }
    let resources = DirResources { root: Path::new(&args[1]).to_path_buf() };
    let layout_name = &args[2];
    let codepage: u16 = args.get(3).map(|s| s.parse().unwrap_or(437)).unwrap_or(437);

    let mut session = Session::new();
    let mut trampoline = NoTrampoline;
    let mut font_sink = NullFontSink;

    match keybcore::load_layout(
        &mut session,
        &resources,
        &mut trampoline,
        &mut font_sink,
        layout_name,
        codepage,
        &format!("{layout_name}.CPX"),
    ) {
        Ok(()) => println!("loaded layout '{}' at code page {}", layout_name, codepage),
        Err(e) => {
            eprintln!("load failed ({}): {e}", e.code());
            std::process::exit(e.code());
        }
    }

    println!("enter scan,flags1,flags2,flags3 as hex (e.g. 1e,01,00,00); blank line to quit");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 4 {
            eprintln!("expected four comma-separated hex bytes");
            continue;
        }
        let parsed: Result<Vec<u8>, _> = parts.iter().map(|p| u8::from_str_radix(p.trim(), 16)).collect();
        let bytes = match parsed {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("invalid hex byte: {e}");
                continue;
            }
        };
        let mut sink = BufferedKeyEmitter::default();
        let handled = keybcore::translate_key(&mut session, bytes[0], bytes[1], bytes[2], bytes[3], &mut sink);
        println!("handled={handled} keys={:04x?}", sink.keys);
    }

    keybcore::shutdown(&mut session, &mut font_sink);
}
