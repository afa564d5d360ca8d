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

    core::devices::pci.rs

    PCI configuration mechanism #1, with an empty bus behind it. The
    address latch reads back so probing firmware concludes the mechanism
    exists, and every configuration read returns all ones: no devices.
*/

use std::{cell::RefCell, rc::Rc};

use crate::bus::IoBus;

pub const PCI_CONFIG_ADDRESS_PORT: u16 = 0xCF8;
pub const PCI_CONFIG_DATA_PORT: u16 = 0xCFC;

pub struct Pci {
    address: u32,
}

impl Pci {
    pub fn new() -> Self {
        Self { address: 0 }
    }

    pub fn create(bus: &mut IoBus) -> Rc<RefCell<Pci>> {
        let pci = Rc::new(RefCell::new(Pci::new()));
        let p = pci.clone();
        bus.map_write_u32(PCI_CONFIG_ADDRESS_PORT, move |_, data| {
            p.borrow_mut().address = data
        });
        let p = pci.clone();
        bus.map_read_u32(PCI_CONFIG_ADDRESS_PORT, move |_| p.borrow().address);
        bus.map_write_u32(PCI_CONFIG_DATA_PORT, |_, _| {});
        let p = pci.clone();
        bus.map_read_u32(PCI_CONFIG_DATA_PORT, move |_| {
            log::trace!("PCI: config read at {:08X}, no device", p.borrow().address);
            0xFFFF_FFFF
        });
        pci
    }
}
