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

    core::devices::pic.rs

    The cascaded pair of 8259 PICs (Programmable Interrupt Controller).
    Both units live in one state block; the master polls the slave through
    the cascade when arbitration reaches line 2. Devices raise interrupts
    by count, so a burst of timer ticks delivered late is not lost.
*/

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::bus::IoBus;

pub const PIC1_COMMAND_PORT: u16 = 0x20;
pub const PIC1_DATA_PORT: u16 = 0x21;
pub const PIC2_COMMAND_PORT: u16 = 0xA0;
pub const PIC2_DATA_PORT: u16 = 0xA1;

const ICW1_IS_ICW1: u8 = 0b0001_0000; // Bit determines if a command write is ICW1

const OCW2_COMMAND_MASK: u8 = 0b1111_1000;
const OCW2_LINE_MASK: u8 = 0b0000_0111;
const OCW2_NONSPECIFIC_EOI: u8 = 0b0010_0000;
const OCW2_SPECIFIC_EOI: u8 = 0b0110_0000;

const ICW2_OFFSET_MASK: u8 = 0b1111_1000; // Vector offset occupies the top five bits

/// Master line the slave unit cascades through.
pub const CASCADE_LINE: u8 = 2;

/// ICW phase at which a unit accepts and delivers interrupts. Phases one
/// through three are the initialization sequence (expecting ICW2..ICW4).
const PHASE_OPERATIONAL: u8 = 4;

pub const IRQ_LINES: usize = 16;
const UNIT_LINES: u8 = 8;

pub struct Pic {
    phase: [u8; 2],          // Initialization phase per unit
    icw: [u8; 8],            // ICW1-ICW4 per unit
    imr: [u8; 2],            // Interrupt Mask Register
    isr: [u8; 2],            // In-Service Register
    pending: [u32; IRQ_LINES], // Undelivered raise count per global line
    queue: VecDeque<u8>,     // Accepted global lines awaiting INTA
}

impl Pic {
    pub fn new() -> Self {
        Self {
            phase: [0; 2],
            icw: [0; 8],
            imr: [0xFF; 2],
            isr: [0; 2],
            pending: [0; IRQ_LINES],
            queue: VecDeque::new(),
        }
    }

    /// Construct a PIC pair and claim the standard master/slave ports.
    pub fn create(bus: &mut IoBus) -> Rc<RefCell<Pic>> {
        let pic = Rc::new(RefCell::new(Pic::new()));
        for (unit, command_port, data_port) in [
            (0usize, PIC1_COMMAND_PORT, PIC1_DATA_PORT),
            (1usize, PIC2_COMMAND_PORT, PIC2_DATA_PORT),
        ] {
            let p = pic.clone();
            bus.map_write_u8(command_port, move |_, data| {
                p.borrow_mut().handle_command_write(unit, data)
            });
            let p = pic.clone();
            bus.map_read_u8(command_port, move |_| p.borrow().handle_command_read(unit));
            let p = pic.clone();
            bus.map_write_u8(data_port, move |_, data| {
                p.borrow_mut().handle_data_write(unit, data)
            });
            let p = pic.clone();
            bus.map_read_u8(data_port, move |_| p.borrow().handle_data_read(unit));
        }
        pic
    }

    pub fn handle_command_write(&mut self, unit: usize, data: u8) {
        if data & ICW1_IS_ICW1 != 0 {
            log::trace!("PIC{}: ICW1 {:02X}, beginning initialization", unit + 1, data);
            self.phase[unit] = 1;
            self.icw[unit * 4] = data;
            self.isr[unit] = 0;
        }
        else if data & OCW2_COMMAND_MASK == OCW2_NONSPECIFIC_EOI {
            // Retire the highest priority service in progress.
            for line in 0..UNIT_LINES {
                let mask = 1 << line;
                if self.isr[unit] & mask != 0 {
                    self.isr[unit] &= !mask;
                    break;
                }
            }
            self.arbitrate(0);
        }
        else if data & OCW2_COMMAND_MASK == OCW2_SPECIFIC_EOI {
            let mask = 1 << (data & OCW2_LINE_MASK);
            if self.isr[unit] & mask != 0 {
                self.isr[unit] &= !mask;
            }
            self.arbitrate(0);
        }
        else {
            log::trace!("PIC{}: unhandled command byte {:02X}", unit + 1, data);
        }
    }

    pub fn handle_command_read(&self, unit: usize) -> u8 {
        self.isr[unit]
    }

    pub fn handle_data_write(&mut self, unit: usize, data: u8) {
        let phase = self.phase[unit];
        if phase > 0 && phase < PHASE_OPERATIONAL {
            log::trace!("PIC{}: ICW{} {:02X}", unit + 1, phase + 1, data);
            self.icw[unit * 4 + phase as usize] = data;
            self.phase[unit] += 1;
        }
        else {
            // OCW1. An unmask may make a pending line deliverable.
            self.imr[unit] = data;
            self.arbitrate(0);
        }
    }

    pub fn handle_data_read(&self, unit: usize) -> u8 {
        self.imr[unit]
    }

    /// Interrupt request from a device. `line` is the global line number,
    /// 0-7 on the master and 8-15 on the slave.
    pub fn raise_irq(&mut self, line: u8) {
        self.raise_irq_count(line, 1);
    }

    /// Raise `count` interrupts on a line at once. Used by the timer when
    /// the scheduler catches up over several elapsed periods.
    pub fn raise_irq_count(&mut self, line: u8, count: u32) {
        self.pending[line as usize & (IRQ_LINES - 1)] += count;
        self.arbitrate(0);
    }

    /// Drop any undelivered raises on a line. Lines already accepted into
    /// the delivery queue are unaffected.
    pub fn clear_pending(&mut self, line: u8) {
        self.pending[line as usize & (IRQ_LINES - 1)] = 0;
    }

    pub fn pending_count(&self, line: u8) -> u32 {
        self.pending[line as usize & (IRQ_LINES - 1)]
    }

    /// State of the INTR line to the CPU.
    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Accept the highest priority deliverable line, if any. Lower line
    /// number wins. A line already in service blocks itself and everything
    /// below it on its unit; a masked line is skipped but stays pending.
    /// At the cascade line the master polls the slave before considering
    /// its own remaining lines.
    fn arbitrate(&mut self, unit: usize) {
        if self.phase[unit] != PHASE_OPERATIONAL {
            return;
        }
        // One accepted line at a time; the next arbitration happens on
        // EOI, unmask or raise.
        if !self.queue.is_empty() {
            return;
        }
        for line in 0..UNIT_LINES {
            let mask = 1 << line;
            if unit == 0 && line == CASCADE_LINE && self.imr[0] & mask == 0 {
                self.arbitrate(1);
                if !self.queue.is_empty() {
                    return;
                }
            }
            if self.isr[unit] & mask != 0 {
                break;
            }
            if self.imr[unit] & mask != 0 {
                continue;
            }
            let global = (unit as u8) * UNIT_LINES + line;
            if self.pending[global as usize] > 0 {
                self.pending[global as usize] -= 1;
                self.isr[unit] |= mask;
                self.queue.push_back(global);
                return;
            }
        }
    }

    /// INTA: pop the accepted line and return its vector, formed from the
    /// unit's ICW2 offset. Returns 0 when no line has been accepted.
    pub fn dequeue_irq(&mut self) -> u8 {
        let Some(line) = self.queue.pop_front() else {
            return 0;
        };
        let unit = (line / UNIT_LINES) as usize;
        let local = line % UNIT_LINES;
        self.isr[unit] |= 1 << local;
        (self.icw[unit * 4 + 1] & ICW2_OFFSET_MASK) | local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HostSender;

    /// Standard AT initialization: master at vector 0x08, slave at 0x70,
    /// cascade through line 2, everything unmasked.
    fn init_pair(pic: &mut Pic) {
        pic.handle_command_write(0, 0x11);
        pic.handle_data_write(0, 0x08);
        pic.handle_data_write(0, 0x04);
        pic.handle_data_write(0, 0x01);
        pic.handle_command_write(1, 0x11);
        pic.handle_data_write(1, 0x70);
        pic.handle_data_write(1, 0x02);
        pic.handle_data_write(1, 0x01);
        pic.handle_data_write(0, 0x00);
        pic.handle_data_write(1, 0x00);
    }

    #[test]
    fn vectors_follow_icw2() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(1);
        assert!(pic.has_queued());
        assert_eq!(pic.dequeue_irq(), 0x09);
    }

    #[test]
    fn empty_dequeue_returns_zero() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        assert_eq!(pic.dequeue_irq(), 0);
        assert_eq!(pic.handle_command_read(0), 0);
    }

    #[test]
    fn no_delivery_before_initialization() {
        let mut pic = Pic::new();
        pic.raise_irq(3);
        assert!(!pic.has_queued());
        assert_eq!(pic.pending_count(3), 1);
    }

    #[test]
    fn lowest_line_wins_arbitration() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        // mask everything so both lines pool as pending
        pic.handle_data_write(0, 0xFF);
        pic.raise_irq(5);
        pic.raise_irq(2);
        assert!(!pic.has_queued());
        // unmasking triggers arbitration; line 2 outranks line 5
        pic.handle_data_write(0, 0x00);
        assert_eq!(pic.dequeue_irq(), 0x0A);
        pic.handle_command_write(0, 0x20);
        assert_eq!(pic.dequeue_irq(), 0x0D);
    }

    #[test]
    fn masked_line_stays_pending_until_unmask() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.handle_data_write(0, 0b0000_1000);
        pic.raise_irq(3);
        assert!(!pic.has_queued());
        assert_eq!(pic.pending_count(3), 1);
        pic.handle_data_write(0, 0x00);
        assert!(pic.has_queued());
        assert_eq!(pic.dequeue_irq(), 0x0B);
        assert_eq!(pic.pending_count(3), 0);
    }

    #[test]
    fn in_service_blocks_reentry_until_eoi() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(4);
        assert_eq!(pic.dequeue_irq(), 0x0C);
        // a second raise on the same line waits for EOI
        pic.raise_irq(4);
        assert!(!pic.has_queued());
        assert_eq!(pic.handle_command_read(0), 0b0001_0000);
        pic.handle_command_write(0, 0x20);
        assert!(pic.has_queued());
        assert_eq!(pic.dequeue_irq(), 0x0C);
    }

    #[test]
    fn in_service_blocks_lower_priority() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(1);
        assert_eq!(pic.dequeue_irq(), 0x09);
        pic.raise_irq(6);
        assert!(!pic.has_queued());
        // but a higher priority line preempts the queue
        pic.raise_irq(0);
        assert!(pic.has_queued());
        assert_eq!(pic.dequeue_irq(), 0x08);
    }

    #[test]
    fn specific_eoi_clears_named_line() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(4);
        pic.dequeue_irq();
        // specific EOI for a different line leaves the service bit alone
        pic.handle_command_write(0, 0x60 | 3);
        assert_eq!(pic.handle_command_read(0), 0b0001_0000);
        pic.handle_command_write(0, 0x60 | 4);
        assert_eq!(pic.handle_command_read(0), 0);
    }

    #[test]
    fn cascade_delivers_slave_vector() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(12);
        assert!(pic.has_queued());
        assert_eq!(pic.dequeue_irq(), 0x74);
        // slave EOI retires the service; the next raise delivers again
        pic.handle_command_write(1, 0x20);
        pic.raise_irq(12);
        assert_eq!(pic.dequeue_irq(), 0x74);
    }

    #[test]
    fn cascade_respects_master_mask() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.handle_data_write(0, 1 << CASCADE_LINE);
        pic.raise_irq(8);
        assert!(!pic.has_queued());
        pic.handle_data_write(0, 0x00);
        assert_eq!(pic.dequeue_irq(), 0x70);
    }

    #[test]
    fn raises_coalesce_by_count() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.handle_data_write(0, 0xFF);
        pic.raise_irq_count(0, 3);
        assert_eq!(pic.pending_count(0), 3);
        pic.handle_data_write(0, 0x00);
        for _ in 0..3 {
            assert!(pic.has_queued());
            assert_eq!(pic.dequeue_irq(), 0x08);
            pic.handle_command_write(0, 0x20);
        }
        assert!(!pic.has_queued());
        assert_eq!(pic.pending_count(0), 0);
    }

    #[test]
    fn clear_pending_drops_backlog() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.handle_data_write(0, 0x01);
        pic.raise_irq_count(0, 4);
        pic.clear_pending(0);
        pic.handle_data_write(0, 0x00);
        assert!(!pic.has_queued());
    }

    #[test]
    fn reinitialization_clears_in_service() {
        let mut pic = Pic::new();
        init_pair(&mut pic);
        pic.raise_irq(4);
        pic.dequeue_irq();
        assert_ne!(pic.handle_command_read(0), 0);
        pic.handle_command_write(0, 0x11);
        assert_eq!(pic.handle_command_read(0), 0);
    }

    #[test]
    fn registers_on_standard_ports() {
        let (tx, _rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx);
        let pic = Pic::create(&mut bus);
        bus.io_write_u8(PIC1_COMMAND_PORT, 0x11);
        bus.io_write_u8(PIC1_DATA_PORT, 0x08);
        bus.io_write_u8(PIC1_DATA_PORT, 0x04);
        bus.io_write_u8(PIC1_DATA_PORT, 0x01);
        bus.io_write_u8(PIC1_DATA_PORT, 0xAC);
        assert_eq!(bus.io_read_u8(PIC1_DATA_PORT), 0xAC);
        pic.borrow_mut().raise_irq(0);
        pic.borrow_mut().raise_irq(1);
        assert_eq!(pic.borrow_mut().dequeue_irq(), 0x08);
    }
}
