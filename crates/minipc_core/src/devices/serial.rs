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

    core::devices::serial.rs

    A minimal 8250 style UART used as the machine's serial console. The
    transmit side never blocks; the scheduler drains it into host console
    events after every execution burst.
*/

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{bus::IoBus, devices::pic::Pic};

pub const COM1_DEFAULT_BASE: u16 = 0x3F8;
pub const COM1_DEFAULT_IRQ: u8 = 4;

const DATA_REGISTER: u16 = 0;
const INTERRUPT_ENABLE_REGISTER: u16 = 1;
const LINE_STATUS_REGISTER: u16 = 5;

const IER_RX_DATA_AVAILABLE: u8 = 0b0000_0001;
const LSR_DATA_READY: u8 = 0b0000_0001;
const LSR_TRANSMIT_EMPTY: u8 = 0b0110_0000; // Holding and shift registers both idle

pub struct Uart {
    rx_fifo: VecDeque<u8>, // Host to guest
    tx_fifo: VecDeque<u8>, // Guest to host, drained by the scheduler
    ier: u8,
    irq: u8,
    pic: Rc<RefCell<Pic>>,
}

impl Uart {
    pub fn new(irq: u8, pic: Rc<RefCell<Pic>>) -> Self {
        Self {
            rx_fifo: VecDeque::new(),
            tx_fifo: VecDeque::new(),
            ier: 0,
            irq,
            pic,
        }
    }

    pub fn create(bus: &mut IoBus, base: u16, irq: u8, pic: Rc<RefCell<Pic>>) -> Rc<RefCell<Uart>> {
        let uart = Rc::new(RefCell::new(Uart::new(irq, pic)));
        let u = uart.clone();
        bus.map_write_u8(base + DATA_REGISTER, move |_, data| {
            u.borrow_mut().tx_fifo.push_back(data)
        });
        let u = uart.clone();
        bus.map_read_u8(base + DATA_REGISTER, move |_| {
            u.borrow_mut().rx_fifo.pop_front().unwrap_or(0)
        });
        let u = uart.clone();
        bus.map_write_u8(base + INTERRUPT_ENABLE_REGISTER, move |_, data| {
            u.borrow_mut().ier = data
        });
        let u = uart.clone();
        bus.map_read_u8(base + INTERRUPT_ENABLE_REGISTER, move |_| u.borrow().ier);
        let u = uart.clone();
        bus.map_read_u8(base + LINE_STATUS_REGISTER, move |_| u.borrow().line_status());
        uart
    }

    fn line_status(&self) -> u8 {
        let mut lsr = LSR_TRANSMIT_EMPTY;
        if !self.rx_fifo.is_empty() {
            lsr |= LSR_DATA_READY;
        }
        lsr
    }

    /// A byte arriving from the host side. Interrupts the guest only when
    /// receive interrupts are enabled.
    pub fn receive(&mut self, data: u8) {
        self.rx_fifo.push_back(data);
        if self.ier & IER_RX_DATA_AVAILABLE != 0 {
            self.pic.borrow_mut().raise_irq(self.irq);
        }
    }

    /// Take everything the guest has transmitted since the last drain.
    /// Bytes are interpreted as Latin-1 so firmware banners render as is.
    pub fn drain_tx(&mut self) -> Option<String> {
        if self.tx_fifo.is_empty() {
            return None;
        }
        Some(self.tx_fifo.drain(..).map(|b| b as char).collect())
    }
}
