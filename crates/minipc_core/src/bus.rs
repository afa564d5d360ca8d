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

    core::bus.rs

    Port-mapped I/O bus. Devices claim ports by registering read and write
    closures per access width; the CPU core dispatches its IN/OUT traffic
    here. Unclaimed ports float (all ones on read, writes dropped), and a
    host-provided redirect map can mirror byte writes out as events.
*/

use minipc_common::{HostEvent, MpcHashMap};

use crate::channel::HostSender;

pub const NO_DEVICE_U8: u8 = 0xFF;
pub const NO_DEVICE_U16: u16 = 0xFFFF;
pub const NO_DEVICE_U32: u32 = 0xFFFF_FFFF;

/// Word access to an unclaimed port below this limit splits into a pair of
/// byte accesses, low byte first, as on the ISA bus. At or above the limit
/// unclaimed word ports simply float.
pub const WORD_SPLIT_LIMIT: u16 = 1024;

/// The redirect map covers the full 16-bit port space, one bit per port,
/// packed little-endian into u32 words.
pub const IO_REDIRECT_MAP_LEN: usize = 2048;

pub type ReadU8Fn = Box<dyn FnMut(u16) -> u8>;
pub type WriteU8Fn = Box<dyn FnMut(u16, u8)>;
pub type ReadU16Fn = Box<dyn FnMut(u16) -> u16>;
pub type WriteU16Fn = Box<dyn FnMut(u16, u16)>;
pub type ReadU32Fn = Box<dyn FnMut(u16) -> u32>;
pub type WriteU32Fn = Box<dyn FnMut(u16, u32)>;

pub struct IoBus {
    read_u8_map: MpcHashMap<u16, ReadU8Fn>,
    write_u8_map: MpcHashMap<u16, WriteU8Fn>,
    read_u16_map: MpcHashMap<u16, ReadU16Fn>,
    write_u16_map: MpcHashMap<u16, WriteU16Fn>,
    read_u32_map: MpcHashMap<u16, ReadU32Fn>,
    write_u32_map: MpcHashMap<u16, WriteU32Fn>,
    redirect_map: Vec<u32>,
    host: HostSender,
}

fn claim<T>(map: &mut MpcHashMap<u16, T>, port: u16, handler: T, kind: &str) {
    if map.insert(port, handler).is_some() {
        panic!("I/O port {:04X}: duplicate {} handler", port, kind);
    }
}

impl IoBus {
    pub fn new(host: HostSender) -> Self {
        Self {
            read_u8_map: MpcHashMap::default(),
            write_u8_map: MpcHashMap::default(),
            read_u16_map: MpcHashMap::default(),
            write_u16_map: MpcHashMap::default(),
            read_u32_map: MpcHashMap::default(),
            write_u32_map: MpcHashMap::default(),
            redirect_map: vec![0; IO_REDIRECT_MAP_LEN],
            host,
        }
    }

    /// Install the host's port redirect bitmap. A short slice leaves the
    /// remainder of the port space unredirected.
    pub fn set_redirect_map(&mut self, words: &[u32]) {
        for (dst, src) in self.redirect_map.iter_mut().zip(words.iter()) {
            *dst = *src;
        }
    }

    pub fn redirect_enabled(&self, port: u16) -> bool {
        (self.redirect_map[(port >> 5) as usize] >> (port & 31)) & 1 != 0
    }

    pub fn map_read_u8(&mut self, port: u16, handler: impl FnMut(u16) -> u8 + 'static) {
        claim(&mut self.read_u8_map, port, Box::new(handler) as ReadU8Fn, "byte read");
    }
    pub fn map_write_u8(&mut self, port: u16, handler: impl FnMut(u16, u8) + 'static) {
        claim(&mut self.write_u8_map, port, Box::new(handler) as WriteU8Fn, "byte write");
    }
    pub fn map_read_u16(&mut self, port: u16, handler: impl FnMut(u16) -> u16 + 'static) {
        claim(&mut self.read_u16_map, port, Box::new(handler) as ReadU16Fn, "word read");
    }
    pub fn map_write_u16(&mut self, port: u16, handler: impl FnMut(u16, u16) + 'static) {
        claim(&mut self.write_u16_map, port, Box::new(handler) as WriteU16Fn, "word write");
    }
    pub fn map_read_u32(&mut self, port: u16, handler: impl FnMut(u16) -> u32 + 'static) {
        claim(&mut self.read_u32_map, port, Box::new(handler) as ReadU32Fn, "dword read");
    }
    pub fn map_write_u32(&mut self, port: u16, handler: impl FnMut(u16, u32) + 'static) {
        claim(&mut self.write_u32_map, port, Box::new(handler) as WriteU32Fn, "dword write");
    }

    pub fn io_write_u8(&mut self, port: u16, data: u8) {
        if let Some(handler) = self.write_u8_map.get_mut(&port) {
            handler(port, data);
        }
        // The redirect mirror fires whether or not a device claimed the port.
        if self.redirect_enabled(port) {
            self.host.send(HostEvent::PortOut { port, data });
        }
    }

    pub fn io_read_u8(&mut self, port: u16) -> u8 {
        match self.read_u8_map.get_mut(&port) {
            Some(handler) => handler(port),
            None => NO_DEVICE_U8,
        }
    }

    pub fn io_write_u16(&mut self, port: u16, data: u16) {
        if let Some(handler) = self.write_u16_map.get_mut(&port) {
            handler(port, data);
        }
        else if port < WORD_SPLIT_LIMIT {
            self.io_write_u8(port, data as u8);
            self.io_write_u8(port + 1, (data >> 8) as u8);
        }
    }

    pub fn io_read_u16(&mut self, port: u16) -> u16 {
        if let Some(handler) = self.read_u16_map.get_mut(&port) {
            handler(port)
        }
        else if port < WORD_SPLIT_LIMIT {
            let lo = self.io_read_u8(port) as u16;
            let hi = self.io_read_u8(port + 1) as u16;
            lo | (hi << 8)
        }
        else {
            NO_DEVICE_U16
        }
    }

    pub fn io_write_u32(&mut self, port: u16, data: u32) {
        if let Some(handler) = self.write_u32_map.get_mut(&port) {
            handler(port, data);
        }
    }

    pub fn io_read_u32(&mut self, port: u16) -> u32 {
        match self.read_u32_map.get_mut(&port) {
            Some(handler) => handler(port),
            None => NO_DEVICE_U32,
        }
    }
}
