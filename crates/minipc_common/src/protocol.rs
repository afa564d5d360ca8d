/*
    MiniPC
    https://github.com/minipc-emu/minipc

    Copyright 2023-2026 the MiniPC contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    common::protocol.rs

    Host message protocol.
    Inbound command payloads and outbound event types exchanged between the
    machine core and whatever host embeds it. Wire names follow the message
    protocol of the original worker transport.
*/

use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::video::VideoModeParams;

/// Payload of the `start` command. Everything the machine needs to come up:
/// RAM size, the port redirect bitmap, the CPU generation to boot, and a few
/// optional extras.
#[derive(Clone, Debug, Deserialize)]
pub struct MachineConfig {
    #[serde(rename = "memoryKB", alias = "mem")]
    pub memory_kb: u32,
    /// One bit per port, 2048 32-bit words. Byte writes to flagged ports are
    /// forwarded to the host as `outb` events.
    #[serde(rename = "ioRedirectMap", default)]
    pub io_redirect_map: Vec<u32>,
    #[serde(alias = "gen", default = "default_generation")]
    pub generation: u8,
    /// Instantiate the MPU-401 at its default base when set.
    #[serde(default)]
    pub midi: bool,
    #[serde(rename = "imageName", default)]
    pub image_name: Option<String>,
    /// Plant a breakpoint at 0000:7C00 before the first burst.
    #[serde(rename = "breakOnBootSector", alias = "br_mbr", default)]
    pub break_on_boot_sector: bool,
}

fn default_generation() -> u8 {
    1
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_kb: 640,
            io_redirect_map: Vec::new(),
            generation: default_generation(),
            midi: false,
            image_name: None,
            break_on_boot_sector: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Display)]
pub enum KeyEventKind {
    #[serde(rename = "keydown")]
    #[strum(to_string = "keydown")]
    Down,
    #[serde(rename = "keyup")]
    #[strum(to_string = "keyup")]
    Up,
}

/// A host keyboard event, in DOM terms: `code` is the physical key name
/// (`"KeyA"`, `"Digit1"`, ...), `key` is the produced character when there is
/// one, `key_code` is the legacy numeric code used as a fallback.
#[derive(Clone, Debug, Deserialize)]
pub struct KeyInput {
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "keyCode", default)]
    pub key_code: u8,
    #[serde(rename = "ctrlKey", default)]
    pub ctrl_key: bool,
    #[serde(rename = "altKey", default)]
    pub alt_key: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Display)]
pub enum PointerButton {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
    #[serde(rename = "M")]
    Middle,
}

/// A host pointer event: relative motion in screen coordinates and/or one
/// button transition.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PointerInput {
    #[serde(rename = "move", default)]
    pub motion: Option<[i32; 2]>,
    #[serde(default)]
    pub button: Option<PointerButton>,
    #[serde(default)]
    pub pressed: bool,
}

/// Commands the host sends to a running machine. `start` is not listed here
/// since its payload ([`MachineConfig`]) is consumed at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum HostCommand {
    Reset {
        #[serde(alias = "gen", default)]
        generation: Option<u8>,
    },
    Key {
        #[serde(flatten)]
        input: KeyInput,
    },
    Pointer {
        #[serde(flatten)]
        input: PointerInput,
    },
    Attach {
        #[serde(rename = "diskImageBytes", alias = "blob")]
        disk_image_bytes: Vec<u8>,
    },
    Debug {
        #[serde(rename = "commandLine", alias = "cmdline")]
        command_line: String,
    },
    Nmi,
}

/// Events the machine emits for the host to render, play or act on.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", content = "data")]
pub enum HostEvent {
    /// Terminal output.
    #[serde(rename = "write")]
    Write(String),
    /// Speaker tone in Hz; 0 silences.
    #[serde(rename = "beep")]
    Beep(f32),
    #[serde(rename = "vga_mode")]
    VgaMode(VideoModeParams),
    /// A full frame copied out of the active video-memory window.
    #[serde(rename = "vga")]
    VgaFrame(Vec<u8>),
    /// Text cursor cell offset; 0xFFFF when hidden.
    #[serde(rename = "vga_cursor")]
    VgaCursor(u16),
    /// Palette entry: DAC index and packed little-endian RGBA.
    #[serde(rename = "pal")]
    Palette(u8, u32),
    /// Byte write to a redirect-flagged port.
    #[serde(rename = "outb")]
    PortOut { port: u16, data: u8 },
    #[serde(rename = "alert")]
    Alert(String),
    /// The machine entered (or acted in) the debugger; hosts use this to
    /// surface their debug UI.
    #[serde(rename = "debugReaction")]
    DebugReaction,
    /// One complete MIDI message.
    #[serde(rename = "midi")]
    Midi(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_payload_accepts_both_field_spellings() {
        let long: MachineConfig =
            serde_json::from_str(r#"{"memoryKB": 1024, "generation": 4}"#).unwrap();
        assert_eq!(long.memory_kb, 1024);
        assert_eq!(long.generation, 4);

        let short: MachineConfig = serde_json::from_str(r#"{"mem": 640, "gen": 2}"#).unwrap();
        assert_eq!(short.memory_kb, 640);
        assert_eq!(short.generation, 2);
        assert!(!short.midi);
    }

    #[test]
    fn key_command_flattens_event_fields() {
        let cmd: HostCommand = serde_json::from_str(
            r#"{"command": "key", "type": "keydown", "code": "KeyA", "key": "a", "keyCode": 65}"#,
        )
        .unwrap();
        match cmd {
            HostCommand::Key { input } => {
                assert_eq!(input.kind, KeyEventKind::Down);
                assert_eq!(input.code, "KeyA");
                assert_eq!(input.key_code, 65);
                assert!(!input.ctrl_key);
            }
            _ => panic!("wrong command variant"),
        }
    }

    #[test]
    fn events_serialize_under_their_wire_names() {
        let json = serde_json::to_string(&HostEvent::PortOut { port: 0x92, data: 2 }).unwrap();
        assert!(json.contains(r#""command":"outb""#));
        let json = serde_json::to_string(&HostEvent::DebugReaction).unwrap();
        assert!(json.contains(r#""command":"debugReaction""#));
    }
}
