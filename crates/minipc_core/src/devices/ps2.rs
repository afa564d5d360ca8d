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

    core::devices::ps2.rs

    The 8042 style keyboard controller with an attached keyboard and PS/2
    mouse. Host key events are translated to set 1 make/break codes; the
    keyboard FIFO carries 16-bit entries whose high byte is the cooked
    ASCII of the key, readable in one word through the extended status
    port by paravirtual aware firmware. Byte reads see only the scancode.
*/

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use lazy_static::lazy_static;

use minipc_common::{KeyEventKind, KeyInput, MpcHashMap, PointerButton, PointerInput};

use crate::{bus::IoBus, devices::pic::Pic};

pub const PS2_DATA_PORT: u16 = 0x60;
pub const PS2_COMMAND_PORT: u16 = 0x64; // Status on read

pub const KEYBOARD_IRQ: u8 = 1;
pub const MOUSE_IRQ: u8 = 12;

const PS2_ACK: u8 = 0xFA;
const SELF_TEST_OK: u8 = 0xAA;

/// Fallback scancode for keys with an ASCII value but no set 1 code.
const SCAN_DUMMY: u16 = 0x6F;

lazy_static! {
    /// DOM `code` name to set 1 scancode. Extended keys carry their 0xE0
    /// prefix in the high byte.
    static ref CODE_TABLE: MpcHashMap<&'static str, u16> = {
        let mut m = MpcHashMap::default();
        for (code, scancode) in [
            ("Escape", 0x01u16),
            ("Digit1", 0x02),
            ("Digit2", 0x03),
            ("Digit3", 0x04),
            ("Digit4", 0x05),
            ("Digit5", 0x06),
            ("Digit6", 0x07),
            ("Digit7", 0x08),
            ("Digit8", 0x09),
            ("Digit9", 0x0A),
            ("Digit0", 0x0B),
            ("Minus", 0x0C),
            ("Equal", 0x0D),
            ("Backspace", 0x0E),
            ("Tab", 0x0F),
            ("KeyQ", 0x10),
            ("KeyW", 0x11),
            ("KeyE", 0x12),
            ("KeyR", 0x13),
            ("KeyT", 0x14),
            ("KeyY", 0x15),
            ("KeyU", 0x16),
            ("KeyI", 0x17),
            ("KeyO", 0x18),
            ("KeyP", 0x19),
            ("BracketLeft", 0x1A),
            ("BracketRight", 0x1B),
            ("Enter", 0x1C),
            ("ControlLeft", 0x1D),
            ("KeyA", 0x1E),
            ("KeyS", 0x1F),
            ("KeyD", 0x20),
            ("KeyF", 0x21),
            ("KeyG", 0x22),
            ("KeyH", 0x23),
            ("KeyJ", 0x24),
            ("KeyK", 0x25),
            ("KeyL", 0x26),
            ("Semicolon", 0x27),
            ("Quote", 0x28),
            ("Backquote", 0x29),
            ("ShiftLeft", 0x2A),
            ("Backslash", 0x2B),
            ("KeyZ", 0x2C),
            ("KeyX", 0x2D),
            ("KeyC", 0x2E),
            ("KeyV", 0x2F),
            ("KeyB", 0x30),
            ("KeyN", 0x31),
            ("KeyM", 0x32),
            ("Comma", 0x33),
            ("Period", 0x34),
            ("Slash", 0x35),
            ("ShiftRight", 0x36),
            ("AltLeft", 0x38),
            ("Space", 0x39),
            ("AltRight", 0xE038),
            ("ControlRight", 0xE01D),
            ("F1", 0x3B),
            ("F2", 0x3C),
            ("F3", 0x3D),
            ("F4", 0x3E),
            ("F5", 0x3F),
            ("F6", 0x40),
            ("F7", 0x41),
            ("F8", 0x42),
            ("F9", 0x43),
            ("F10", 0x44),
            ("Home", 0xE047),
            ("ArrowUp", 0xE048),
            ("PageUp", 0xE049),
            ("ArrowLeft", 0xE04B),
            ("ArrowRight", 0xE04D),
            ("End", 0xE04F),
            ("ArrowDown", 0xE050),
            ("Insert", 0xE052),
            ("Delete", 0xE053),
            ("IntlRo", 0x73),
            ("IntlYen", 0x7D),
        ] {
            m.insert(code, scancode);
        }
        m
    };
}

/// Legacy `keyCode` to set 1 scancode, for hosts that cannot supply a DOM
/// code name. Unknown typewriter keys map to the dummy scancode.
#[rustfmt::skip]
const SCAN_TABLE: [u8; 256] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0x0F, 0x00, 0x00, 0x00, 0x1C, 0x00, 0x00,
    0x2A, 0x1D, 0x38, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x39, 0x00, 0x00, 0x00, 0x00, 0x4B, 0x48, 0x4D, 0x50, 0x00, 0x00, 0x00, 0x00, 0x52, 0x53, 0x00,
    0x0B, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, 0x23, 0x17, 0x24, 0x25, 0x26, 0x32, 0x31, 0x18,
    0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, 0x2D, 0x15, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x40, 0x41, 0x42, 0x43, 0x44, 0x57, 0x58, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x6F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6F, 0x6F, 0x6F, 0x6F, 0x6F, 0x6F,
    0x6F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6F, 0x6F, 0x6F, 0x6F, 0x00,
    0x00, 0x00, 0x6F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Translate a host key event into an optional 0xE0 prefix and a 16-bit
/// FIFO entry (scancode low, cooked ASCII high). None means the event
/// produces no traffic.
fn translate_key(input: &KeyInput) -> Option<(Option<u8>, u16)> {
    let mut scancode = CODE_TABLE
        .get(input.code.as_str())
        .copied()
        .unwrap_or(SCAN_TABLE[input.key_code as usize] as u16);
    let mut prefix = None;
    if scancode > 0x100 {
        prefix = Some((scancode >> 8) as u8);
        scancode &= 0x7F;
    }

    let mut ascii = {
        let mut chars = input.key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c as u32,
            _ => 0,
        }
    };
    if ascii == 0xA5 {
        // IntlYen produces the DOS backslash
        ascii = 0x5C;
    }
    if ascii >= 0x80 {
        ascii = 0;
    }
    if input.ctrl_key && (0x40..0x80).contains(&ascii) {
        ascii &= 0x1F;
    }

    if ascii != 0 {
        scancode |= (ascii as u16) << 8;
    }
    else {
        // control keys firmware expects as ASCII despite multi-char key names
        match input.key_code {
            0x08 | 0x09 | 0x0D | 0x1B => scancode |= (input.key_code as u16) << 8,
            _ => {}
        }
    }
    if input.alt_key {
        // Alt chords deliver the bare make code so Alt+numpad entry works
        scancode &= 0x7F;
    }
    if scancode == 0 && ascii != 0 {
        scancode = SCAN_DUMMY;
    }
    if input.kind == KeyEventKind::Up {
        scancode |= 0x80;
    }

    if scancode & 0x7F != 0 {
        Some((prefix, scancode))
    }
    else {
        None
    }
}

#[derive(Copy, Clone, Default)]
struct MouseButtons {
    left: bool,
    right: bool,
    middle: bool,
}

impl MouseButtons {
    fn packet_bits(self) -> u8 {
        0x08 | (self.left as u8) | ((self.right as u8) << 1) | ((self.middle as u8) << 2)
    }
}

pub struct Ps2Controller {
    last_command: u8,
    iram: [u8; 32],
    kbd_fifo: VecDeque<u16>,
    mouse_fifo: VecDeque<u8>,
    pointer: (i32, i32), // Accumulated motion, mouse coordinates (y up)
    buttons: MouseButtons,
    keyboard_enabled: bool,
    mouse_enabled: bool,
    pic: Rc<RefCell<Pic>>,
}

impl Ps2Controller {
    pub fn new(pic: Rc<RefCell<Pic>>) -> Self {
        Self {
            last_command: 0,
            iram: [0; 32],
            kbd_fifo: VecDeque::new(),
            mouse_fifo: VecDeque::new(),
            pointer: (0, 0),
            buttons: MouseButtons::default(),
            keyboard_enabled: true,
            mouse_enabled: false,
            pic,
        }
    }

    pub fn create(bus: &mut IoBus, pic: Rc<RefCell<Pic>>) -> Rc<RefCell<Ps2Controller>> {
        let ps2 = Rc::new(RefCell::new(Ps2Controller::new(pic)));
        let p = ps2.clone();
        bus.map_write_u8(PS2_DATA_PORT, move |_, data| p.borrow_mut().data_write(data));
        let p = ps2.clone();
        bus.map_read_u8(PS2_DATA_PORT, move |_| p.borrow_mut().data_read());
        let p = ps2.clone();
        bus.map_write_u8(PS2_COMMAND_PORT, move |_, data| p.borrow_mut().command_write(data));
        let p = ps2.clone();
        bus.map_read_u8(PS2_COMMAND_PORT, move |_| p.borrow().status_read());
        // paravirtual: one word read takes a whole FIFO entry, ASCII included
        let p = ps2.clone();
        bus.map_read_u16(PS2_COMMAND_PORT, move |_| {
            p.borrow_mut().kbd_fifo.pop_front().unwrap_or(0)
        });
        ps2
    }

    fn post_key(&mut self, entry: u16) {
        self.kbd_fifo.push_back(entry);
        self.pic.borrow_mut().raise_irq(KEYBOARD_IRQ);
    }

    fn post_mouse(&mut self, data: u8) {
        self.mouse_fifo.push_back(data);
        self.pic.borrow_mut().raise_irq(MOUSE_IRQ);
    }

    fn post_mouse_packet(&mut self) {
        let (x, y) = self.pointer;
        let mut head = self.buttons.packet_bits();
        if x < 0 {
            head |= 0x10;
        }
        if y < 0 {
            head |= 0x20;
        }
        self.post_mouse(head);
        self.post_mouse((x & 0xFF) as u8);
        self.post_mouse((y & 0xFF) as u8);
    }

    /// Controller command on port 0x64.
    pub fn command_write(&mut self, data: u8) {
        if (0x20..=0x3F).contains(&data) {
            let value = self.iram[(data & 0x1F) as usize];
            self.post_key(value as u16);
        }
        else {
            match data {
                0x55 => self.post_key(SELF_TEST_OK as u16),
                // port enable/disable, acknowledged without effect
                0xA7 | 0xA8 | 0xAD | 0xAE => {}
                // interface tests always pass
                0xA9 | 0xAB => self.post_key(0x00),
                _ => self.last_command = data,
            }
        }
    }

    /// Data byte on port 0x60, addressed by the preceding command: the
    /// controller RAM window, the mouse (after 0xD4), or the keyboard.
    pub fn data_write(&mut self, data: u8) {
        let command = self.last_command;
        if (0x60..=0x7F).contains(&command) {
            self.iram[(command & 0x1F) as usize] = data;
        }
        else if command == 0xD4 {
            match data {
                0xF2 => {
                    self.post_mouse(PS2_ACK);
                    self.post_mouse(0x00); // standard mouse ID
                }
                0xF4 => {
                    self.mouse_enabled = true;
                    self.post_mouse(PS2_ACK);
                }
                0xF5 => {
                    self.mouse_enabled = false;
                    self.post_mouse(PS2_ACK);
                }
                0xFF => {
                    self.pic.borrow_mut().clear_pending(MOUSE_IRQ);
                    self.mouse_fifo.clear();
                    self.mouse_enabled = false;
                    self.post_mouse(SELF_TEST_OK);
                }
                _ => log::trace!("PS2: unhandled mouse command {:02X}", data),
            }
        }
        else {
            match data {
                0xF2 => {
                    self.post_key(PS2_ACK as u16);
                    // MF2 keyboard ID
                    self.post_key(0xAB);
                    self.post_key(0x83);
                }
                0xF4 => {
                    self.keyboard_enabled = true;
                    self.post_key(PS2_ACK as u16);
                }
                0xF5 => {
                    self.keyboard_enabled = false;
                    self.post_key(PS2_ACK as u16);
                }
                0xFF => {
                    self.pic.borrow_mut().clear_pending(KEYBOARD_IRQ);
                    self.kbd_fifo.clear();
                    self.keyboard_enabled = false;
                    self.post_key(SELF_TEST_OK as u16);
                }
                _ => log::trace!("PS2: unhandled keyboard command {:02X}", data),
            }
        }
        self.last_command = 0;
    }

    /// Byte read of the data port: the keyboard FIFO drains first, one
    /// whole entry per read with the ASCII half discarded, then the mouse.
    pub fn data_read(&mut self) -> u8 {
        if let Some(entry) = self.kbd_fifo.pop_front() {
            entry as u8
        }
        else {
            self.mouse_fifo.pop_front().unwrap_or(0)
        }
    }

    pub fn status_read(&self) -> u8 {
        (!self.kbd_fifo.is_empty()) as u8
    }

    pub fn key_input(&mut self, input: &KeyInput) {
        if !self.keyboard_enabled {
            return;
        }
        if let Some((prefix, entry)) = translate_key(input) {
            if let Some(prefix) = prefix {
                self.post_key(prefix as u16);
            }
            self.post_key(entry);
        }
    }

    pub fn pointer_input(&mut self, input: &PointerInput) {
        if !self.mouse_enabled {
            return;
        }
        if let Some(motion) = input.motion {
            // host motion is screen-down positive; mouse y is the reverse
            self.pointer.0 += motion[0];
            self.pointer.1 -= motion[1];
        }
        if let Some(button) = input.button {
            match button {
                PointerButton::Left => self.buttons.left = input.pressed,
                PointerButton::Right => self.buttons.right = input.pressed,
                PointerButton::Middle => self.buttons.middle = input.pressed,
            }
        }
        if input.motion.is_some() || input.button.is_some() {
            self.post_mouse_packet();
            self.pointer = (0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HostSender;

    fn fixture() -> (IoBus, Rc<RefCell<Pic>>, Rc<RefCell<Ps2Controller>>) {
        let (tx, _rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx);
        let pic = Pic::create(&mut bus);
        let ps2 = Ps2Controller::create(&mut bus, pic.clone());
        (bus, pic, ps2)
    }

    fn key(kind: KeyEventKind, key: &str, code: &str) -> KeyInput {
        KeyInput {
            kind,
            key: key.to_string(),
            code: code.to_string(),
            key_code: 0,
            ctrl_key: false,
            alt_key: false,
        }
    }

    fn enable_mouse(ps2: &Rc<RefCell<Ps2Controller>>, bus: &mut IoBus) {
        bus.io_write_u8(PS2_COMMAND_PORT, 0xD4);
        bus.io_write_u8(PS2_DATA_PORT, 0xF4);
        // consume the ACK
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), PS2_ACK);
        assert!(ps2.borrow().mouse_enabled);
    }

    #[test]
    fn letter_key_carries_scancode_and_ascii() {
        let (_, _, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry, 0x611E); // 'a' << 8 | make code
    }

    #[test]
    fn key_release_sets_the_break_bit() {
        let (_, _, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Up, "a", "KeyA"));
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry & 0xFF, 0x9E);
    }

    #[test]
    fn extended_key_sends_its_prefix_first() {
        let (mut bus, _, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "ArrowUp", "ArrowUp"));
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0xE0);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0x48);
    }

    #[test]
    fn ctrl_chord_folds_ascii_to_control_code() {
        let (_, _, ps2) = fixture();
        let mut input = key(KeyEventKind::Down, "c", "KeyC");
        input.ctrl_key = true;
        ps2.borrow_mut().key_input(&input);
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry >> 8, 0x03); // ETX
        assert_eq!(entry & 0xFF, 0x2E);
    }

    #[test]
    fn keycode_fallback_translates_without_code_name() {
        let (_, _, ps2) = fixture();
        let mut input = key(KeyEventKind::Down, "Enter", "");
        input.key_code = 0x0D;
        ps2.borrow_mut().key_input(&input);
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry, 0x0D1C); // keyCode as ASCII | Enter make code
    }

    #[test]
    fn unmapped_keys_translate_to_the_dummy_scancode() {
        let (_, _, ps2) = fixture();
        // non-ASCII with no scancode produces nothing
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "§", ""));
        assert!(ps2.borrow().kbd_fifo.is_empty());
        // legacy keyCode 186 (';' on some layouts) maps to the dummy
        let mut input = key(KeyEventKind::Down, ";", "");
        input.key_code = 186;
        ps2.borrow_mut().key_input(&input);
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry & 0xFF, 0x6F);
        assert_eq!(entry >> 8, b';' as u16);
    }

    #[test]
    fn alt_chord_without_scancode_falls_back_to_the_dummy() {
        let (_, _, ps2) = fixture();
        let mut input = key(KeyEventKind::Down, "+", "");
        input.alt_key = true;
        ps2.borrow_mut().key_input(&input);
        // alt strips the ASCII half, leaving the bare dummy make code
        let entry = ps2.borrow_mut().kbd_fifo.pop_front().unwrap();
        assert_eq!(entry, 0x6F);
    }

    #[test]
    fn printable_key_with_no_mapping_at_all_is_dropped() {
        let (_, _, ps2) = fixture();
        // without alt the ASCII half keeps the entry nonzero but the
        // scancode half is empty, so nothing is sent
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "+", ""));
        assert!(ps2.borrow().kbd_fifo.is_empty());
    }

    #[test]
    fn word_read_returns_the_cooked_entry() {
        let (mut bus, _, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        assert_eq!(bus.io_read_u8(PS2_COMMAND_PORT), 1);
        assert_eq!(bus.io_read_u16(PS2_COMMAND_PORT), 0x611E);
        assert_eq!(bus.io_read_u8(PS2_COMMAND_PORT), 0);
    }

    #[test]
    fn keyboard_events_raise_irq1() {
        let (_, pic, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        assert_eq!(pic.borrow().pending_count(KEYBOARD_IRQ), 1);
    }

    #[test]
    fn controller_ram_roundtrip() {
        let (mut bus, _, _) = fixture();
        bus.io_write_u8(PS2_COMMAND_PORT, 0x60); // write byte 0
        bus.io_write_u8(PS2_DATA_PORT, 0x5D);
        bus.io_write_u8(PS2_COMMAND_PORT, 0x20); // read byte 0
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0x5D);
    }

    #[test]
    fn self_test_reports_passed() {
        let (mut bus, _, _) = fixture();
        bus.io_write_u8(PS2_COMMAND_PORT, 0x55);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0xAA);
    }

    #[test]
    fn keyboard_reset_flushes_and_disables() {
        let (mut bus, pic, ps2) = fixture();
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "b", "KeyB"));
        assert_eq!(pic.borrow().pending_count(KEYBOARD_IRQ), 2);
        bus.io_write_u8(PS2_DATA_PORT, 0xFF);
        // the backlog is dropped; one raise remains for the reset reply
        assert_eq!(pic.borrow().pending_count(KEYBOARD_IRQ), 1);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0xAA);
        // keyboard stays quiet until re-enabled
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        assert!(ps2.borrow().kbd_fifo.is_empty());
        bus.io_write_u8(PS2_DATA_PORT, 0xF4);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), PS2_ACK);
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        assert!(!ps2.borrow().kbd_fifo.is_empty());
    }

    #[test]
    fn mouse_motion_emits_one_packet() {
        let (mut bus, _, ps2) = fixture();
        enable_mouse(&ps2, &mut bus);
        ps2.borrow_mut().pointer_input(&PointerInput {
            motion: Some([5, 3]), // 3 down on screen = -3 in mouse coordinates
            button: Some(PointerButton::Left),
            pressed: true,
        });
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0x08 | 0x01 | 0x20);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 5);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0xFD); // -3
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0);
    }

    #[test]
    fn mouse_buttons_latch_across_packets() {
        let (mut bus, _, ps2) = fixture();
        enable_mouse(&ps2, &mut bus);
        ps2.borrow_mut().pointer_input(&PointerInput {
            motion: None,
            button: Some(PointerButton::Right),
            pressed: true,
        });
        // pure motion afterwards still reports the held button
        ps2.borrow_mut().pointer_input(&PointerInput {
            motion: Some([1, 0]),
            button: None,
            pressed: false,
        });
        let first = bus.io_read_u8(PS2_DATA_PORT);
        assert_eq!(first & 0x02, 0x02);
        bus.io_read_u8(PS2_DATA_PORT);
        bus.io_read_u8(PS2_DATA_PORT);
        let second = bus.io_read_u8(PS2_DATA_PORT);
        assert_eq!(second & 0x02, 0x02);
    }

    #[test]
    fn mouse_events_are_dropped_while_disabled() {
        let (_, _, ps2) = fixture();
        ps2.borrow_mut().pointer_input(&PointerInput {
            motion: Some([2, 2]),
            button: None,
            pressed: false,
        });
        assert!(ps2.borrow().mouse_fifo.is_empty());
    }

    #[test]
    fn mouse_identify_returns_standard_id() {
        let (mut bus, _, _) = fixture();
        bus.io_write_u8(PS2_COMMAND_PORT, 0xD4);
        bus.io_write_u8(PS2_DATA_PORT, 0xF2);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), PS2_ACK);
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0x00);
    }

    #[test]
    fn keyboard_fifo_outranks_mouse_fifo() {
        let (mut bus, _, ps2) = fixture();
        enable_mouse(&ps2, &mut bus);
        ps2.borrow_mut().pointer_input(&PointerInput {
            motion: Some([1, 1]),
            button: None,
            pressed: false,
        });
        ps2.borrow_mut().key_input(&key(KeyEventKind::Down, "a", "KeyA"));
        // the keyboard byte preempts the queued mouse packet
        assert_eq!(bus.io_read_u8(PS2_DATA_PORT), 0x1E);
    }
}
