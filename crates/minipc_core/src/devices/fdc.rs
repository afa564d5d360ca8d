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

    core::devices::fdc.rs

    Paravirtual floppy disk controller. A register file at 0xFD00 takes a
    CHS address, a 32-bit linear transfer address and a sector count;
    commands move whole sectors between the disk image and guest memory
    by DMA and report completion through a status word, never an
    interrupt. Geometry is detected when an image is attached, from the
    FAT BIOS Parameter Block when one is present or from a table of
    standard raw image sizes otherwise.
*/

use lazy_static::lazy_static;

use std::{cell::RefCell, fmt, rc::Rc};

use minipc_common::MpcHashMap;

use crate::{bus::IoBus, memory::GuestMemory};

pub const FDC_BASE_PORT: u16 = 0xFD00;

// Register offsets from the base port.
const REG_COMMAND: u16 = 0; // word: command on write, status on read
const REG_ADDR_LO: u16 = 2; // word: transfer address bits 0-15
const REG_ADDR_HI: u16 = 4; // word: transfer address bits 16-31
const REG_COUNT: u16 = 6; // byte: sector count
const REG_HEAD: u16 = 7; // byte
const REG_SECTOR: u16 = 8; // byte: 1-based
const REG_CYLINDER: u16 = 9; // byte

pub const CMD_INQUIRE: u16 = 0;
pub const CMD_READ_SECTORS: u16 = 1;
pub const CMD_WRITE_SECTORS: u16 = 2;

pub const ST_OK: u16 = 0;
pub const ST_SECTOR_ERROR: u16 = 1;
pub const ST_NOT_READY: u16 = 2;
pub const ST_DISK_CHANGED: u16 = 3;

pub const SECTOR_SIZE: usize = 512;

/// A cylinder/head/sector triple, used both for drive geometry and for
/// addressing a sector within it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskChs {
    pub c: u16,
    pub h: u8,
    pub s: u8,
}

impl DiskChs {
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
}

impl fmt::Display for DiskChs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

pub struct DiskFormat {
    pub chs: DiskChs,
}

lazy_static! {
    /// Geometries for the standard raw image sizes, 160KB through 2.88MB.
    pub static ref DISK_FORMATS: MpcHashMap<usize, DiskFormat> = {
        MpcHashMap::from_iter([
            (163_840, DiskFormat { chs: DiskChs::new(40, 1, 8) }),
            (184_320, DiskFormat { chs: DiskChs::new(40, 1, 9) }),
            (327_680, DiskFormat { chs: DiskChs::new(40, 2, 8) }),
            (368_640, DiskFormat { chs: DiskChs::new(40, 2, 9) }),
            (655_360, DiskFormat { chs: DiskChs::new(80, 2, 8) }),
            (737_280, DiskFormat { chs: DiskChs::new(80, 2, 9) }),
            (1_228_800, DiskFormat { chs: DiskChs::new(80, 2, 15) }),
            (1_474_560, DiskFormat { chs: DiskChs::new(80, 2, 18) }),
            (2_949_120, DiskFormat { chs: DiskChs::new(80, 2, 36) }),
        ])
    };
}

#[derive(Debug)]
pub enum FloppyError {
    UnknownFormat(usize),
}

impl fmt::Display for FloppyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloppyError::UnknownFormat(len) => {
                write!(f, "unrecognized floppy image size: {} bytes", len)
            }
        }
    }
}

impl std::error::Error for FloppyError {}

/// Read geometry out of a FAT BIOS Parameter Block. The boot sector must
/// carry the 0x55AA signature, open with a jump opcode, and describe
/// 512-byte sectors in a whole number of cylinders that fit the image.
fn parse_bpb(image: &[u8]) -> Option<(DiskChs, u32)> {
    if image.len() < SECTOR_SIZE || image[510] != 0x55 || image[511] != 0xAA {
        return None;
    }
    if !matches!(image[0], 0xEB | 0xE9) {
        return None;
    }
    let bytes_per_sector = u16::from_le_bytes([image[0x0B], image[0x0C]]);
    let total_sectors = u16::from_le_bytes([image[0x13], image[0x14]]);
    let sectors_per_track = u16::from_le_bytes([image[0x18], image[0x19]]);
    let heads = u16::from_le_bytes([image[0x1A], image[0x1B]]);
    if bytes_per_sector as usize != SECTOR_SIZE || total_sectors == 0 {
        return None;
    }
    if !(1..=63).contains(&sectors_per_track) || !(1..=2).contains(&heads) {
        return None;
    }
    let track = sectors_per_track as u32 * heads as u32;
    if u32::from(total_sectors) % track != 0 {
        return None;
    }
    if total_sectors as usize * SECTOR_SIZE > image.len() {
        return None;
    }
    let cylinders = (u32::from(total_sectors) / track) as u16;
    Some((
        DiskChs::new(cylinders, heads as u8, sectors_per_track as u8),
        u32::from(total_sectors),
    ))
}

enum TransferOp {
    Read,
    Write,
}

pub struct FloppyController {
    mem: Rc<RefCell<GuestMemory>>,
    image: Option<Vec<u8>>,
    geometry: DiskChs,
    total_sectors: u32,
    disk_changed: bool,
    status: u16,
    addr_lo: u16,
    addr_hi: u16,
    count: u8,
    head: u8,
    sector: u8,
    cylinder: u8,
}

impl FloppyController {
    pub fn new(mem: Rc<RefCell<GuestMemory>>) -> Self {
        Self {
            mem,
            image: None,
            geometry: DiskChs::default(),
            total_sectors: 0,
            disk_changed: false,
            status: 0,
            addr_lo: 0,
            addr_hi: 0,
            count: 0,
            head: 0,
            sector: 0,
            cylinder: 0,
        }
    }

    pub fn create(bus: &mut IoBus, mem: &Rc<RefCell<GuestMemory>>) -> Rc<RefCell<FloppyController>> {
        let fdc = Rc::new(RefCell::new(FloppyController::new(mem.clone())));
        let f = fdc.clone();
        bus.map_write_u16(FDC_BASE_PORT + REG_COMMAND, move |_, data| {
            f.borrow_mut().command_write(data)
        });
        let f = fdc.clone();
        bus.map_read_u16(FDC_BASE_PORT + REG_COMMAND, move |_| f.borrow().status);
        let f = fdc.clone();
        bus.map_write_u16(FDC_BASE_PORT + REG_ADDR_LO, move |_, data| f.borrow_mut().addr_lo = data);
        let f = fdc.clone();
        bus.map_read_u16(FDC_BASE_PORT + REG_ADDR_LO, move |_| f.borrow().addr_lo);
        let f = fdc.clone();
        bus.map_write_u16(FDC_BASE_PORT + REG_ADDR_HI, move |_, data| f.borrow_mut().addr_hi = data);
        let f = fdc.clone();
        bus.map_read_u16(FDC_BASE_PORT + REG_ADDR_HI, move |_| f.borrow().addr_hi);
        let f = fdc.clone();
        bus.map_write_u8(FDC_BASE_PORT + REG_COUNT, move |_, data| f.borrow_mut().count = data);
        let f = fdc.clone();
        bus.map_read_u8(FDC_BASE_PORT + REG_COUNT, move |_| f.borrow().count);
        let f = fdc.clone();
        bus.map_write_u8(FDC_BASE_PORT + REG_HEAD, move |_, data| f.borrow_mut().head = data);
        let f = fdc.clone();
        bus.map_read_u8(FDC_BASE_PORT + REG_HEAD, move |_| f.borrow().head);
        let f = fdc.clone();
        bus.map_write_u8(FDC_BASE_PORT + REG_SECTOR, move |_, data| f.borrow_mut().sector = data);
        let f = fdc.clone();
        bus.map_read_u8(FDC_BASE_PORT + REG_SECTOR, move |_| f.borrow().sector);
        let f = fdc.clone();
        bus.map_write_u8(FDC_BASE_PORT + REG_CYLINDER, move |_, data| {
            f.borrow_mut().cylinder = data
        });
        let f = fdc.clone();
        bus.map_read_u8(FDC_BASE_PORT + REG_CYLINDER, move |_| f.borrow().cylinder);
        fdc
    }

    /// Attach a disk image, replacing any current one. Attaching over an
    /// existing image latches the disk-changed condition; transfers fail
    /// with `ST_DISK_CHANGED` until the guest acknowledges via INQUIRE.
    pub fn attach_image(&mut self, image: Vec<u8>) -> Result<(), FloppyError> {
        let (geometry, total_sectors) = match parse_bpb(&image) {
            Some(parsed) => parsed,
            None => match DISK_FORMATS.get(&image.len()) {
                Some(format) => (format.chs, (image.len() / SECTOR_SIZE) as u32),
                None => return Err(FloppyError::UnknownFormat(image.len())),
            },
        };
        if self.image.is_some() {
            self.disk_changed = true;
        }
        log::debug!(
            "FDC: attached {}KB image, geometry {} lba {}",
            image.len() / 1024,
            geometry,
            total_sectors
        );
        self.image = Some(image);
        self.geometry = geometry;
        self.total_sectors = total_sectors;
        Ok(())
    }

    fn command_write(&mut self, data: u16) {
        match data {
            CMD_INQUIRE => {
                self.disk_changed = false;
                self.status = self.total_sectors as u16;
            }
            CMD_READ_SECTORS => self.status = self.transfer(TransferOp::Read),
            CMD_WRITE_SECTORS => self.status = self.transfer(TransferOp::Write),
            _ => log::trace!("FDC: unknown command {:04X}", data),
        }
    }

    fn transfer_addr(&self) -> u32 {
        (self.addr_hi as u32) << 16 | self.addr_lo as u32
    }

    fn set_transfer_addr(&mut self, addr: u32) {
        self.addr_lo = addr as u16;
        self.addr_hi = (addr >> 16) as u16;
    }

    fn request_chs(&self) -> DiskChs {
        DiskChs::new(self.cylinder as u16, self.head, self.sector)
    }

    fn transfer(&mut self, op: TransferOp) -> u16 {
        let Some(mut image) = self.image.take() else {
            log::debug!("FDC: transfer with no media {}", self.request_chs());
            return ST_NOT_READY;
        };
        let status = if self.disk_changed {
            ST_DISK_CHANGED
        } else {
            self.run_transfer(&mut image, op)
        };
        self.image = Some(image);
        status
    }

    fn run_transfer(&mut self, image: &mut [u8], op: TransferOp) -> u16 {
        let geometry = self.geometry;
        if self.sector < 1
            || self.sector > geometry.s
            || self.head >= geometry.h
            || self.cylinder as u16 >= geometry.c
        {
            log::debug!("FDC: bad sector address {} for geometry {}", self.request_chs(), geometry);
            return ST_SECTOR_ERROR;
        }
        let mut lba = (self.sector as u32 - 1)
            + (self.head as u32 + self.cylinder as u32 * geometry.h as u32) * geometry.s as u32;
        let mut addr = self.transfer_addr();
        log::debug!(
            "FDC: {} {} lba {} mem {:05X} count {}",
            match op {
                TransferOp::Read => "read",
                TransferOp::Write => "write",
            },
            self.request_chs(),
            lba,
            addr,
            self.count
        );
        while self.count > 0 {
            if lba >= self.total_sectors {
                return ST_SECTOR_ERROR;
            }
            let offset = lba as usize * SECTOR_SIZE;
            let sector = &mut image[offset..offset + SECTOR_SIZE];
            let result = match op {
                TransferOp::Read => self.mem.borrow_mut().dma_write(addr, sector),
                TransferOp::Write => self
                    .mem
                    .borrow()
                    .dma_read(addr, SECTOR_SIZE)
                    .map(|bytes| sector.copy_from_slice(bytes)),
            };
            if let Err(e) = result {
                log::warn!("FDC: transfer fault at {:05X}: {}", addr, e);
                return ST_SECTOR_ERROR;
            }
            addr = addr.wrapping_add(SECTOR_SIZE as u32);
            self.set_transfer_addr(addr);
            self.count -= 1;
            lba += 1;
        }
        ST_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HostSender;
    use minipc_common::HostEvent;

    struct Fixture {
        bus: IoBus,
        fdc: Rc<RefCell<FloppyController>>,
        mem: Rc<RefCell<GuestMemory>>,
        _rx: crossbeam_channel::Receiver<HostEvent>,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx);
        let mem = Rc::new(RefCell::new(GuestMemory::new()));
        mem.borrow_mut().grow_to(0x20000);
        let fdc = FloppyController::create(&mut bus, &mem);
        Fixture { bus, fdc, mem, _rx: rx }
    }

    /// Raw image with a recognizable byte pattern in one sector.
    fn image_with_marker(len: usize, lba: usize, marker: u8) -> Vec<u8> {
        let mut image = vec![0u8; len];
        for b in &mut image[lba * SECTOR_SIZE..(lba + 1) * SECTOR_SIZE] {
            *b = marker;
        }
        image
    }

    fn set_chs(f: &mut Fixture, cylinder: u8, head: u8, sector: u8) {
        f.bus.io_write_u8(FDC_BASE_PORT + REG_CYLINDER, cylinder);
        f.bus.io_write_u8(FDC_BASE_PORT + REG_HEAD, head);
        f.bus.io_write_u8(FDC_BASE_PORT + REG_SECTOR, sector);
    }

    fn set_transfer(f: &mut Fixture, addr: u32, count: u8) {
        f.bus.io_write_u16(FDC_BASE_PORT + REG_ADDR_LO, addr as u16);
        f.bus.io_write_u16(FDC_BASE_PORT + REG_ADDR_HI, (addr >> 16) as u16);
        f.bus.io_write_u8(FDC_BASE_PORT + REG_COUNT, count);
    }

    fn command(f: &mut Fixture, cmd: u16) -> u16 {
        f.bus.io_write_u16(FDC_BASE_PORT + REG_COMMAND, cmd);
        f.bus.io_read_u16(FDC_BASE_PORT + REG_COMMAND)
    }

    #[test]
    fn chs_to_lba_follows_geometry() {
        let mut f = fixture();
        // 1.44MB: 80 cylinders, 2 heads, 18 sectors per track
        let image = image_with_marker(1_474_560, 18, 0xA5);
        f.fdc.borrow_mut().attach_image(image).unwrap();

        // head 1 sector 1 is LBA 18
        set_chs(&mut f, 0, 1, 1);
        set_transfer(&mut f, 0x8000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_OK);
        let mem = f.mem.borrow();
        let got = mem.dma_read(0x8000, SECTOR_SIZE).unwrap();
        assert!(got.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn sector_bounds_are_strict() {
        let mut f = fixture();
        f.fdc.borrow_mut().attach_image(vec![0; 1_474_560]).unwrap();
        f.mem.borrow_mut().dma_write(0x8000, &[0xEE; 4]).unwrap();

        for sector in [0u8, 19] {
            set_chs(&mut f, 0, 0, sector);
            set_transfer(&mut f, 0x8000, 1);
            assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_SECTOR_ERROR);
        }
        // out-of-range head and cylinder fail the same way
        set_chs(&mut f, 0, 2, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_SECTOR_ERROR);
        set_chs(&mut f, 80, 0, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_SECTOR_ERROR);

        // no transfer took place
        let mem = f.mem.borrow();
        assert_eq!(mem.dma_read(0x8000, 4).unwrap(), &[0xEE; 4]);
    }

    #[test]
    fn transfers_without_media_report_not_ready() {
        let mut f = fixture();
        set_chs(&mut f, 0, 0, 1);
        set_transfer(&mut f, 0x8000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_NOT_READY);
        assert_eq!(command(&mut f, CMD_WRITE_SECTORS), ST_NOT_READY);
    }

    #[test]
    fn inquire_reports_total_sectors() {
        let mut f = fixture();
        f.fdc.borrow_mut().attach_image(vec![0; 163_840]).unwrap();
        assert_eq!(command(&mut f, CMD_INQUIRE), 320);
    }

    #[test]
    fn disk_change_blocks_transfers_until_inquire() {
        let mut f = fixture();
        f.fdc.borrow_mut().attach_image(vec![0; 163_840]).unwrap();
        f.fdc.borrow_mut().attach_image(vec![0; 1_474_560]).unwrap();

        set_chs(&mut f, 0, 0, 1);
        set_transfer(&mut f, 0x8000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_DISK_CHANGED);

        // INQUIRE acknowledges the change and reports the new size
        assert_eq!(command(&mut f, CMD_INQUIRE), 2880);
        set_transfer(&mut f, 0x8000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_OK);
    }

    #[test]
    fn multi_sector_read_advances_address_and_count() {
        let mut f = fixture();
        f.fdc.borrow_mut().attach_image(vec![0x5A; 1_474_560]).unwrap();

        // three sectors across the 16-bit address boundary
        set_chs(&mut f, 0, 0, 1);
        set_transfer(&mut f, 0xFE00, 3);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_OK);
        assert_eq!(f.bus.io_read_u8(FDC_BASE_PORT + REG_COUNT), 0);
        assert_eq!(f.bus.io_read_u16(FDC_BASE_PORT + REG_ADDR_LO), 0x0400);
        assert_eq!(f.bus.io_read_u16(FDC_BASE_PORT + REG_ADDR_HI), 0x0001);
        let mem = f.mem.borrow();
        assert_eq!(mem.dma_read(0x103FF, 1).unwrap(), &[0x5A]);
    }

    #[test]
    fn read_past_end_of_image_reports_sector_error() {
        let mut f = fixture();
        // 160KB: 40 cylinders, 1 head, 8 sectors; LBA 319 is the last
        f.fdc.borrow_mut().attach_image(vec![0; 163_840]).unwrap();
        set_chs(&mut f, 39, 0, 8);
        set_transfer(&mut f, 0x8000, 2);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_SECTOR_ERROR);
        // the first sector transferred before the overflow
        assert_eq!(f.bus.io_read_u8(FDC_BASE_PORT + REG_COUNT), 1);
    }

    #[test]
    fn write_then_read_roundtrips_through_the_image() {
        let mut f = fixture();
        f.fdc.borrow_mut().attach_image(vec![0; 368_640]).unwrap();
        f.mem.borrow_mut().dma_write(0x4000, &[0xC3; SECTOR_SIZE]).unwrap();

        set_chs(&mut f, 1, 1, 5);
        set_transfer(&mut f, 0x4000, 1);
        assert_eq!(command(&mut f, CMD_WRITE_SECTORS), ST_OK);

        set_chs(&mut f, 1, 1, 5);
        set_transfer(&mut f, 0x6000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_OK);
        let mem = f.mem.borrow();
        assert!(mem.dma_read(0x6000, SECTOR_SIZE).unwrap().iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn bpb_geometry_overrides_the_size_table() {
        let mut f = fixture();
        // a 2KB image no size table entry matches: 2 cylinders, 1 head,
        // 2 sectors per track, described by a valid BPB
        let mut image = vec![0u8; 4 * SECTOR_SIZE];
        image[0] = 0xEB;
        image[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        image[0x13..0x15].copy_from_slice(&4u16.to_le_bytes());
        image[0x18..0x1A].copy_from_slice(&2u16.to_le_bytes());
        image[0x1A..0x1C].copy_from_slice(&1u16.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;
        for b in &mut image[3 * SECTOR_SIZE..] {
            *b = 0x77;
        }
        f.fdc.borrow_mut().attach_image(image).unwrap();
        assert_eq!(command(&mut f, CMD_INQUIRE), 4);

        // cylinder 1, head 0, sector 2 is LBA 3
        set_chs(&mut f, 1, 0, 2);
        set_transfer(&mut f, 0x8000, 1);
        assert_eq!(command(&mut f, CMD_READ_SECTORS), ST_OK);
        let mem = f.mem.borrow();
        assert_eq!(mem.dma_read(0x8000, 1).unwrap(), &[0x77]);
    }

    #[test]
    fn unrecognized_image_size_is_rejected() {
        let f = fixture();
        let result = f.fdc.borrow_mut().attach_image(vec![0; 1000]);
        assert!(matches!(result, Err(FloppyError::UnknownFormat(1000))));
    }
}
