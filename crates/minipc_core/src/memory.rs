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

    core::memory.rs

    Guest physical memory buffer shared between the CPU core and the DMA
    capable devices (floppy controller, video adapter, firmware loader).
*/

use core::fmt::Display;
use std::error::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemError {
    OutOfRange { addr: u32, len: usize },
}
impl Error for MemError {}
impl Display for MemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MemError::OutOfRange { addr, len } => {
                write!(f, "DMA range {:06X}[{}] exceeds allocated guest memory.", addr, len)
            }
        }
    }
}

/// Linear memory backing the guest machine.
///
/// The CPU core owns the layout of this buffer and may reserve space of its
/// own below and above guest RAM. It reports the buffer offset of guest
/// physical address zero as the `origin`; all device DMA is performed in
/// guest physical addresses relative to that origin.
///
/// CPU cores are expected to allocate at least one full megabyte of guest
/// address space so that the adapter windows below 0x100000 are always
/// addressable, even when conventional RAM is configured smaller.
pub struct GuestMemory {
    buf: Vec<u8>,
    origin: u32,
}

impl GuestMemory {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            origin: 0,
        }
    }

    /// Grow the buffer to at least `len` bytes, zero filling the new tail.
    /// Existing contents are preserved. The buffer never shrinks.
    pub fn grow_to(&mut self, len: usize) {
        if len > self.buf.len() {
            self.buf.resize(len, 0);
        }
    }

    pub fn set_origin(&mut self, origin: u32) {
        self.origin = origin;
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Raw access to the full buffer, origin included. CPU cores address
    /// the buffer directly; devices should go through the DMA methods.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, MemError> {
        let start = self.origin as usize + addr as usize;
        let end = start.checked_add(len).ok_or(MemError::OutOfRange { addr, len })?;
        if end > self.buf.len() {
            return Err(MemError::OutOfRange { addr, len });
        }
        Ok(start..end)
    }

    /// Copy `data` into guest memory at physical address `addr`.
    pub fn dma_write(&mut self, addr: u32, data: &[u8]) -> Result<(), MemError> {
        let range = self.range(addr, data.len())?;
        self.buf[range].copy_from_slice(data);
        Ok(())
    }

    /// Borrow `len` bytes of guest memory at physical address `addr`.
    pub fn dma_read(&self, addr: u32, len: usize) -> Result<&[u8], MemError> {
        let range = self.range(addr, len)?;
        Ok(&self.buf[range])
    }

    /// Rolling signature of a window of guest memory, used by the video
    /// adapter to detect changed frames. Rotate-add over little endian
    /// dwords; the tail of a window that is not dword aligned is ignored.
    /// A window extending past the allocation is clamped.
    pub fn signature(&self, addr: u32, len: usize) -> u32 {
        let start = (self.origin as usize).saturating_add(addr as usize);
        if start >= self.buf.len() {
            return 0;
        }
        let end = start.saturating_add(len).min(self.buf.len());
        let mut acc: u32 = 0;
        for word in self.buf[start..end].chunks_exact(4) {
            let v = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            acc = acc.rotate_left(13).wrapping_add(v);
        }
        acc
    }
}
