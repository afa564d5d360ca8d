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

    core::devices::vga.rs

    Display adapter. Register level VGA is reduced to what firmware and
    simple guests actually touch: the CRTC index/data pair (for the text
    cursor), the attribute controller (for mode switches), the DAC
    palette, and the retrace status bit. Pixels are never rendered here;
    the scheduler polls the adapter, which snapshots the active VRAM
    window into a host frame event whenever its signature changes.
*/

use web_time::{Duration, Instant};

use std::{cell::RefCell, rc::Rc};

use minipc_common::{HostEvent, VideoModeParams, MODE_FLAG_CGA, MODE_FLAG_GRAPHICS};

use crate::{bus::IoBus, channel::HostSender, memory::GuestMemory};

pub const CRTC_INDEX_PORT_MDA: u16 = 0x3B4;
pub const CRTC_DATA_PORT_MDA: u16 = 0x3B5;
pub const CRTC_INDEX_PORT: u16 = 0x3D4;
pub const CRTC_DATA_PORT: u16 = 0x3D5;
pub const INPUT_STATUS_PORT_MDA: u16 = 0x3BA;
pub const INPUT_STATUS_PORT: u16 = 0x3DA;
pub const ATTR_INDEX_PORT: u16 = 0x3C0;
pub const ATTR_DATA_PORT: u16 = 0x3C1;
pub const DAC_READ_INDEX_PORT: u16 = 0x3C7;
pub const DAC_WRITE_INDEX_PORT: u16 = 0x3C8;
pub const DAC_DATA_PORT: u16 = 0x3C9;

/// Word port for paravirtual mode selection. Low values take BIOS mode
/// numbers; 0x100 and up select the VESA style packed modes.
pub const VGA_EXTENSION_PORT: u16 = 0xFC04;

const SEGMENT_A000: u32 = 0xA0000;
const SEGMENT_B800: u32 = 0xB8000;

const CRTC_REGS: usize = 24;
const ATTR_REGS: usize = 32;

const CRTC_REG_CURSOR_START: usize = 0x0A;
const CRTC_REG_CURSOR_HI: usize = 0x0E;
const CRTC_REG_CURSOR_LO: usize = 0x0F;
const CURSOR_DISABLE_BIT: u8 = 0x20;

const ATTR_REG_MODE_CONTROL: u8 = 0x10;
const ATTR_MODE_8BIT: u8 = 0x40;
const ATTR_MODE_GRAPHICS: u8 = 0x01;

const RETRACE_BIT: u8 = 0x08;

/// Frame transfers run at 10 fps against the scheduler clock.
const TRANSFER_INTERVAL: Duration = Duration::from_millis(100);

/// Expand a 6-bit DAC component to 8 bits by bit replication.
fn expand_6bit(component: u8) -> u8 {
    let c = component & 0x3F;
    (c << 2) | (c >> 4)
}

pub struct Vga {
    crtc_index: u8,
    crtc: [u8; CRTC_REGS],
    attr_index: u8,
    attr: [u8; ATTR_REGS],
    dac: [u8; 1024], // RGBA bytes, one little endian dword per color
    dac_write_index: usize,
    dac_read_index: usize,
    vram_base: u32,
    vram_size: usize,
    vram_sign: u32,
    vtrace: bool,
    vtrace_toggle: u8,
    transfer_due: Option<Instant>,
    rearm_transfer: bool,
    host: HostSender,
}

impl Vga {
    pub fn new(host: HostSender) -> Self {
        let mut dac = [0u8; 1024];
        for color in dac.chunks_exact_mut(4) {
            color[3] = 0xFF; // opaque alpha
        }
        Self {
            crtc_index: 0,
            crtc: [0; CRTC_REGS],
            attr_index: 0,
            attr: [0; ATTR_REGS],
            dac,
            dac_write_index: 0,
            dac_read_index: 0,
            vram_base: 0,
            vram_size: 0,
            vram_sign: 0,
            vtrace: false,
            vtrace_toggle: 0,
            transfer_due: None,
            rearm_transfer: false,
            host,
        }
    }

    pub fn create(bus: &mut IoBus, host: HostSender) -> Rc<RefCell<Vga>> {
        let vga = Rc::new(RefCell::new(Vga::new(host)));
        for index_port in [CRTC_INDEX_PORT_MDA, CRTC_INDEX_PORT] {
            let v = vga.clone();
            bus.map_write_u8(index_port, move |_, data| v.borrow_mut().crtc_index = data);
            let v = vga.clone();
            bus.map_read_u8(index_port, move |_| v.borrow().crtc_index);
        }
        for data_port in [CRTC_DATA_PORT_MDA, CRTC_DATA_PORT] {
            let v = vga.clone();
            bus.map_write_u8(data_port, move |_, data| v.borrow_mut().crtc_data_write(data));
            let v = vga.clone();
            bus.map_read_u8(data_port, move |_| v.borrow().crtc_data_read());
        }
        for status_port in [INPUT_STATUS_PORT_MDA, INPUT_STATUS_PORT] {
            let v = vga.clone();
            bus.map_read_u8(status_port, move |_| v.borrow_mut().read_vtrace());
        }
        let v = vga.clone();
        bus.map_write_u8(ATTR_INDEX_PORT, move |_, data| v.borrow_mut().attr_index = data);
        let v = vga.clone();
        bus.map_read_u8(ATTR_INDEX_PORT, move |_| v.borrow().attr_index);
        let v = vga.clone();
        bus.map_write_u8(ATTR_DATA_PORT, move |_, data| v.borrow_mut().attr_data_write(data));
        let v = vga.clone();
        bus.map_read_u8(ATTR_DATA_PORT, move |_| v.borrow().attr_data_read());
        let v = vga.clone();
        bus.map_write_u8(DAC_READ_INDEX_PORT, move |_, data| {
            v.borrow_mut().dac_read_index = (data as usize) << 2
        });
        let v = vga.clone();
        bus.map_write_u8(DAC_WRITE_INDEX_PORT, move |_, data| {
            v.borrow_mut().dac_write_index = (data as usize) << 2
        });
        let v = vga.clone();
        bus.map_write_u8(DAC_DATA_PORT, move |_, data| v.borrow_mut().dac_data_write(data));
        let v = vga.clone();
        bus.map_read_u8(DAC_DATA_PORT, move |_| v.borrow_mut().dac_data_read());
        let v = vga.clone();
        bus.map_write_u16(VGA_EXTENSION_PORT, move |_, data| {
            v.borrow_mut().extension_mode_write(data)
        });
        vga
    }

    fn crtc_data_write(&mut self, data: u8) {
        if let Some(reg) = self.crtc.get_mut(self.crtc_index as usize) {
            *reg = data;
        }
    }

    fn crtc_data_read(&self) -> u8 {
        self.crtc.get(self.crtc_index as usize).copied().unwrap_or(0)
    }

    fn attr_data_write(&mut self, data: u8) {
        if self.attr_index == ATTR_REG_MODE_CONTROL {
            self.attr_mode_write(data);
        }
        if let Some(reg) = self.attr.get_mut(self.attr_index as usize) {
            *reg = data;
        }
    }

    fn attr_data_read(&self) -> u8 {
        self.attr.get(self.attr_index as usize).copied().unwrap_or(0)
    }

    /// Retrace status. The retrace bit pulses for one read after each
    /// frame transfer; bit 0 toggles on every read so change polling
    /// loops always make progress.
    fn read_vtrace(&mut self) -> u8 {
        self.vtrace_toggle ^= 0x01;
        if self.vtrace {
            self.vtrace = false;
            RETRACE_BIT | self.vtrace_toggle
        }
        else {
            self.vtrace_toggle
        }
    }

    /// Attribute mode control. Only two configurations are recognized:
    /// the 8-bit chained mode (mode 13h) and a return to text.
    fn attr_mode_write(&mut self, value: u8) {
        if value & ATTR_MODE_8BIT != 0 {
            self.vram_base = SEGMENT_A000;
            self.vram_size = 320 * 200;
            self.set_mode([320, 200], 8, MODE_FLAG_GRAPHICS, Some([640, 400]));
        }
        else if value & ATTR_MODE_GRAPHICS == 0 {
            self.vram_base = SEGMENT_B800;
            self.vram_size = 80 * 25 * 2;
            self.set_mode([640, 400], 4, 0, None);
        }
    }

    fn extension_mode_write(&mut self, value: u16) {
        match value {
            0x03 => {
                self.vram_base = SEGMENT_B800;
                self.vram_size = 80 * 25 * 2;
                self.set_mode([640, 400], 4, 0, None);
            }
            0x06 => {
                self.vram_base = SEGMENT_B800;
                self.vram_size = 0x4000;
                self.set_mode([640, 200], 1, MODE_FLAG_CGA, Some([640, 400]));
            }
            0x11 => {
                self.vram_base = SEGMENT_A000;
                self.vram_size = 640 * 480 / 8;
                self.set_mode([640, 480], 1, MODE_FLAG_GRAPHICS, None);
            }
            0x13 => {
                self.vram_base = SEGMENT_A000;
                self.vram_size = 320 * 200;
                self.set_mode([320, 200], 8, MODE_FLAG_GRAPHICS, Some([640, 400]));
            }
            0x100 => {
                self.vram_base = SEGMENT_A000;
                self.vram_size = 640 * 400;
                self.set_mode([640, 400], 8, MODE_FLAG_GRAPHICS, None);
            }
            0x101 => {
                self.vram_base = SEGMENT_A000;
                self.vram_size = 640 * 480;
                self.set_mode([640, 480], 8, MODE_FLAG_GRAPHICS, None);
            }
            _ => log::debug!("VGA: unknown extension mode {:04X}", value),
        }
    }

    fn set_mode(&mut self, dim: [u16; 2], bpp: u8, flags: u8, vdim: Option<[u16; 2]>) {
        let params = match vdim {
            Some(vdim) => VideoModeParams::with_vdim(dim, vdim, bpp, flags),
            None => VideoModeParams::new(dim, bpp, flags),
        };
        log::debug!("VGA: mode change {:?}", params);
        self.host.send(HostEvent::VgaMode(params));
        // restart the transfer clock on the next poll
        self.rearm_transfer = true;
    }

    fn dac_data_write(&mut self, data: u8) {
        let mut index = self.dac_write_index;
        self.dac[index] = expand_6bit(data);
        index += 1;
        if index & 3 == 3 {
            // third component of a color completes it; publish and skip alpha
            let color = (index >> 2) as u8;
            let base = color as usize * 4;
            let rgba = u32::from_le_bytes([
                self.dac[base],
                self.dac[base + 1],
                self.dac[base + 2],
                self.dac[base + 3],
            ]);
            self.host.send(HostEvent::Palette(color, rgba));
            index += 1;
        }
        self.dac_write_index = index & 0x3FF;
    }

    fn dac_data_read(&mut self) -> u8 {
        let mut index = self.dac_read_index;
        let result = self.dac[index] >> 2;
        index += 1;
        if index & 3 == 3 {
            index += 1;
        }
        self.dac_read_index = index & 0x3FF;
        result
    }

    fn update_cursor(&mut self) {
        let mut cursor = 0xFFFFu16;
        if self.crtc[CRTC_REG_CURSOR_START] & CURSOR_DISABLE_BIT == 0 {
            cursor =
                ((self.crtc[CRTC_REG_CURSOR_HI] as u16) << 8) | self.crtc[CRTC_REG_CURSOR_LO] as u16;
        }
        self.host.send(HostEvent::VgaCursor(cursor));
    }

    /// Scheduler hook. Runs a frame transfer when one is due; until a
    /// mode is set there is no transfer clock and the adapter is silent.
    pub fn poll(&mut self, now: Instant, mem: &GuestMemory) {
        if self.rearm_transfer {
            self.rearm_transfer = false;
            self.transfer_due = Some(now + TRANSFER_INTERVAL);
        }
        if let Some(due) = self.transfer_due {
            if now >= due {
                self.transfer(mem);
                self.transfer_due = Some(now + TRANSFER_INTERVAL);
            }
        }
    }

    /// One frame: pulse retrace, publish the cursor, and snapshot VRAM
    /// out to the host if its contents changed since the last frame.
    fn transfer(&mut self, mem: &GuestMemory) {
        self.vtrace = true;
        self.update_cursor();
        let sign = mem.signature(self.vram_base, self.vram_size);
        if self.vram_sign != sign {
            self.vram_sign = sign;
            match mem.dma_read(self.vram_base, self.vram_size) {
                Ok(frame) => self.host.send(HostEvent::VgaFrame(frame.to_vec())),
                Err(e) => log::warn!("VGA: VRAM window unreadable: {}", e),
            }
        }
    }
}
