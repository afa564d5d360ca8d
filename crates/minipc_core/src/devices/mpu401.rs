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

    core::devices::mpu401.rs

    MPU-401 MIDI interface in UART mode. The guest streams raw MIDI
    bytes through the data port; the device reassembles them into whole
    messages, applying running status and buffering System Exclusive
    payloads until their terminator, and forwards each completed message
    to the host. Real-Time bytes bypass reassembly entirely.
*/

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use minipc_common::HostEvent;

use crate::{bus::IoBus, channel::HostSender};

pub const MPU401_DEFAULT_BASE: u16 = 0x330;

pub const MPU_CMD_RESET: u8 = 0xFF;
pub const MPU_CMD_UART_MODE: u8 = 0x3F;
pub const MPU_ACK: u8 = 0xFE;

/// Status port bit 7: set while the input FIFO has nothing to read.
pub const MPU_STATUS_NO_DATA: u8 = 0x80;

const MIDI_SYSEX_START: u8 = 0xF0;
const MIDI_SYSEX_END: u8 = 0xF7;

pub struct Mpu401 {
    running_status: Option<u8>,
    output: Vec<u8>,
    input: VecDeque<u8>,
    host: HostSender,
}

impl Mpu401 {
    pub fn new(host: HostSender) -> Self {
        Self {
            running_status: None,
            output: Vec::new(),
            input: VecDeque::new(),
            host,
        }
    }

    pub fn create(bus: &mut IoBus, base: u16, host: HostSender) -> Rc<RefCell<Mpu401>> {
        let mpu = Rc::new(RefCell::new(Mpu401::new(host)));
        let m = mpu.clone();
        bus.map_write_u8(base, move |_, data| m.borrow_mut().uart_out(data));
        let m = mpu.clone();
        bus.map_read_u8(base, move |_| m.borrow_mut().input.pop_front().unwrap_or(0));
        let m = mpu.clone();
        bus.map_write_u8(base + 1, move |_, data| m.borrow_mut().command_write(data));
        let m = mpu.clone();
        bus.map_read_u8(base + 1, move |_| {
            if m.borrow().input.is_empty() {
                MPU_STATUS_NO_DATA
            }
            else {
                0
            }
        });
        mpu
    }

    fn command_write(&mut self, data: u8) {
        match data {
            MPU_CMD_RESET => {
                log::debug!("MPU401: reset");
                self.running_status = None;
                self.output.clear();
                self.input.clear();
                self.input.push_back(MPU_ACK);
            }
            MPU_CMD_UART_MODE => {
                log::debug!("MPU401: entering UART mode");
                self.input.push_back(MPU_ACK);
            }
            _ => log::trace!("MPU401: unknown command {:02X}", data),
        }
    }

    fn uart_out(&mut self, data: u8) {
        if data & 0x80 != 0 {
            if data < 0xF0 {
                // channel message status; becomes the running status
                self.running_status = Some(data);
                self.output.clear();
                self.output.push(data);
            }
            else if data >= 0xF8 {
                // Real-Time bytes forward immediately, leaving any
                // message under assembly undisturbed
                self.midi_out(vec![data]);
            }
            else if data == MIDI_SYSEX_END {
                if self.output.len() >= 5 && self.output.first() == Some(&MIDI_SYSEX_START) {
                    self.output.push(data);
                    let message = std::mem::take(&mut self.output);
                    self.midi_out(message);
                }
                else {
                    self.output.clear();
                }
            }
            else {
                // System Common cancels running status
                self.running_status = None;
                self.output.clear();
                self.output.push(data);
            }
        }
        else {
            if self.output.is_empty() {
                match self.running_status {
                    Some(status) => self.output.push(status),
                    // a data byte with no status to apply
                    None => return,
                }
            }
            self.output.push(data);
            match self.output[0] & 0xF0 {
                // SysEx accumulates until its terminator
                0xF0 => {}
                // Program Change and Channel Pressure carry one data byte
                0xC0 | 0xD0 => {
                    if self.output.len() == 2 {
                        let message = std::mem::take(&mut self.output);
                        self.midi_out(message);
                    }
                }
                _ => {
                    if self.output.len() == 3 {
                        let message = std::mem::take(&mut self.output);
                        self.midi_out(message);
                    }
                }
            }
        }
    }

    fn midi_out(&mut self, message: Vec<u8>) {
        self.host.send(HostEvent::Midi(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        bus: IoBus,
        rx: crossbeam_channel::Receiver<HostEvent>,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx.clone());
        let _mpu = Mpu401::create(&mut bus, MPU401_DEFAULT_BASE, tx);
        Fixture { bus, rx }
    }

    fn feed(f: &mut Fixture, bytes: &[u8]) {
        for &b in bytes {
            f.bus.io_write_u8(MPU401_DEFAULT_BASE, b);
        }
    }

    fn messages(f: &Fixture) -> Vec<Vec<u8>> {
        f.rx.try_iter()
            .map(|event| match event {
                HostEvent::Midi(message) => message,
                other => panic!("unexpected event {:?}", other),
            })
            .collect()
    }

    #[test]
    fn running_status_reuses_the_last_status_byte() {
        let mut f = fixture();
        feed(&mut f, &[0x90, 0x40, 0x7F, 0x41, 0x00]);
        assert_eq!(messages(&f), vec![vec![0x90, 0x40, 0x7F], vec![0x90, 0x41, 0x00]]);
    }

    #[test]
    fn two_byte_messages_complete_after_one_data_byte() {
        let mut f = fixture();
        feed(&mut f, &[0xC5, 0x10, 0x22]);
        assert_eq!(messages(&f), vec![vec![0xC5, 0x10], vec![0xC5, 0x22]]);
    }

    #[test]
    fn sysex_buffers_until_the_terminator() {
        let mut f = fixture();
        feed(&mut f, &[0xF0, 0x41, 0x10, 0x16, 0x12, 0xF7]);
        assert_eq!(messages(&f), vec![vec![0xF0, 0x41, 0x10, 0x16, 0x12, 0xF7]]);

        // a runt SysEx is dropped whole
        feed(&mut f, &[0xF0, 0x01, 0xF7]);
        assert!(messages(&f).is_empty());
    }

    #[test]
    fn realtime_bytes_do_not_disturb_assembly() {
        let mut f = fixture();
        feed(&mut f, &[0x90, 0x40, 0xF8, 0x7F]);
        assert_eq!(messages(&f), vec![vec![0xF8], vec![0x90, 0x40, 0x7F]]);
    }

    #[test]
    fn data_bytes_without_any_status_are_dropped() {
        let mut f = fixture();
        feed(&mut f, &[0x40, 0x7F]);
        assert!(messages(&f).is_empty());

        // the stream recovers once a status byte arrives
        feed(&mut f, &[0x90, 0x40, 0x7F]);
        assert_eq!(messages(&f), vec![vec![0x90, 0x40, 0x7F]]);
    }

    #[test]
    fn system_common_cancels_running_status() {
        let mut f = fixture();
        feed(&mut f, &[0x90, 0x40, 0x7F]);
        messages(&f);
        // Song Select opens a system message and kills the running status
        feed(&mut f, &[0xF3, 0x05, 0x41, 0x00]);
        assert!(messages(&f).is_empty());
    }

    #[test]
    fn reset_acknowledges_and_flushes() {
        let mut f = fixture();
        feed(&mut f, &[0x90, 0x40]);
        f.bus.io_write_u8(MPU401_DEFAULT_BASE + 1, MPU_CMD_RESET);
        assert_eq!(f.bus.io_read_u8(MPU401_DEFAULT_BASE + 1), 0);
        assert_eq!(f.bus.io_read_u8(MPU401_DEFAULT_BASE), MPU_ACK);
        assert_eq!(f.bus.io_read_u8(MPU401_DEFAULT_BASE + 1), MPU_STATUS_NO_DATA);
        assert_eq!(f.bus.io_read_u8(MPU401_DEFAULT_BASE), 0);

        // the half-assembled message was discarded by the reset
        feed(&mut f, &[0x7F]);
        assert!(messages(&f).is_empty());

        f.bus.io_write_u8(MPU401_DEFAULT_BASE + 1, MPU_CMD_UART_MODE);
        assert_eq!(f.bus.io_read_u8(MPU401_DEFAULT_BASE), MPU_ACK);
    }
}
