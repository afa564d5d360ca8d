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

    core::devices::pit.rs

    The 8253 PIT (Programmable Interval Timer), reduced to its two roles in
    this machine: channel 0 drives the scheduler's periodic IRQ0 tick, and
    channel 2 keys the speaker. Counting elements are not simulated; a
    completed channel 0 reload publishes a tick period for the scheduler,
    and channel reads return noise.
*/

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use modular_bitfield::prelude::*;

use minipc_common::HostEvent;

use crate::{bus::IoBus, channel::HostSender, devices::pic::Pic};

pub const PIT_CHANNEL_0_DATA_PORT: u16 = 0x40;
pub const PIT_CHANNEL_1_DATA_PORT: u16 = 0x41;
pub const PIT_CHANNEL_2_DATA_PORT: u16 = 0x42;
pub const PIT_COMMAND_REGISTER: u16 = 0x43;

/// Port B of the system control PPI; only the speaker gate and the
/// refresh toggle are modeled here.
pub const PPI_PORT_B: u16 = 0x61;

pub const PIT_FREQ: f64 = 1_193_181.0;
const PIT_TICKS_PER_MS: f64 = PIT_FREQ / 1000.0;

const SPEAKER_GATE_BIT: u8 = 0b0000_0010; // Port B bit 1 gates channel 2 into the speaker
const REFRESH_TOGGLE_BIT: u8 = 0b0001_0000; // Port B bit 4 flips on every read

const TIMER_CHANNEL: usize = 0;
const SPEAKER_CHANNEL: usize = 2;

#[bitfield]
#[derive(Copy, Clone)]
pub struct ControlWord {
    pub bcd: bool,
    pub channel_mode: B3,
    pub access_mode: B2,
    pub channel: B2,
}

#[derive(Copy, Clone, Default)]
struct PitChannel {
    control: u8,     // Last programmed control word
    high_phase: bool, // Next data write is the high reload byte
    reload: [u8; 2], // Reload value, low byte first
}

impl PitChannel {
    /// Effective reload count. A reload of zero means the full 65536.
    fn reload_value(&self) -> u32 {
        let count = self.reload[0] as u32 | ((self.reload[1] as u32) << 8);
        if count == 0 {
            0x10000
        }
        else {
            count
        }
    }
}

pub struct ProgrammableIntervalTimer {
    channels: [PitChannel; 3],
    port_b: u8,
    pic: Rc<RefCell<Pic>>,
    tick_period: Rc<Cell<f64>>, // Scheduler tick period in ms; 0 disables the tick
    host: HostSender,
}

pub type Pit = ProgrammableIntervalTimer;

impl ProgrammableIntervalTimer {
    pub fn new(pic: Rc<RefCell<Pic>>, tick_period: Rc<Cell<f64>>, host: HostSender) -> Self {
        Self {
            channels: [PitChannel::default(); 3],
            port_b: 0,
            pic,
            tick_period,
            host,
        }
    }

    pub fn create(
        bus: &mut IoBus,
        pic: Rc<RefCell<Pic>>,
        tick_period: Rc<Cell<f64>>,
        host: HostSender,
    ) -> Rc<RefCell<Pit>> {
        let pit = Rc::new(RefCell::new(Pit::new(pic, tick_period, host)));
        for channel in 0..3u16 {
            let p = pit.clone();
            bus.map_write_u8(PIT_CHANNEL_0_DATA_PORT + channel, move |_, data| {
                p.borrow_mut().data_write(channel as usize, data)
            });
            let p = pit.clone();
            bus.map_read_u8(PIT_CHANNEL_0_DATA_PORT + channel, move |_| {
                p.borrow_mut().data_read(channel as usize)
            });
        }
        let p = pit.clone();
        bus.map_write_u8(PIT_COMMAND_REGISTER, move |_, data| {
            p.borrow_mut().control_write(data)
        });
        let p = pit.clone();
        bus.map_write_u8(PPI_PORT_B, move |_, data| p.borrow_mut().port_b_write(data));
        let p = pit.clone();
        bus.map_read_u8(PPI_PORT_B, move |_| p.borrow_mut().port_b_read());
        pit
    }

    pub fn control_write(&mut self, data: u8) {
        let control = ControlWord::from_bytes([data]);
        let channel = control.channel() as usize;
        if channel > SPEAKER_CHANNEL {
            // 8254 readback; not supported on the 8253
            log::trace!("PIT: ignoring readback command {:02X}", data);
            return;
        }
        if control.access_mode() == 0 {
            log::trace!("PIT: ignoring latch command for channel {}", channel);
            return;
        }
        self.channels[channel] = PitChannel {
            control: data,
            high_phase: false,
            reload: [0, 0],
        };
        match channel {
            TIMER_CHANNEL => self.retire_timer(),
            SPEAKER_CHANNEL => self.note_off(),
            _ => {}
        }
    }

    /// Reload bytes always arrive as a low/high pair; the single byte
    /// access modes are treated as the paired sequence.
    pub fn data_write(&mut self, channel: usize, data: u8) {
        let complete = {
            let ch = &mut self.channels[channel];
            if !ch.high_phase {
                ch.reload[0] = data;
                ch.high_phase = true;
                false
            }
            else {
                ch.reload[1] = data;
                ch.high_phase = false;
                true
            }
        };
        if complete {
            match channel {
                TIMER_CHANNEL => self.install_timer(),
                SPEAKER_CHANNEL => {
                    if self.port_b & SPEAKER_GATE_BIT != 0 {
                        self.note_on();
                    }
                }
                _ => {}
            }
        }
    }

    /// Counter readback is not simulated; reads return noise so polling
    /// loops that wait for change still make progress.
    pub fn data_read(&mut self, _channel: usize) -> u8 {
        rand::random::<u8>()
    }

    pub fn port_b_write(&mut self, data: u8) {
        let toggled = (self.port_b ^ data) & SPEAKER_GATE_BIT != 0;
        self.port_b = data;
        if toggled {
            if data & SPEAKER_GATE_BIT != 0 {
                self.note_on();
            }
            else {
                self.note_off();
            }
        }
    }

    pub fn port_b_read(&mut self) -> u8 {
        // DRAM refresh detection loops watch this bit flip
        self.port_b ^= REFRESH_TOGGLE_BIT;
        self.port_b
    }

    fn install_timer(&mut self) {
        let reload = self.channels[TIMER_CHANNEL].reload_value();
        let period_ms = (reload as f64 / PIT_TICKS_PER_MS).ceil();
        log::debug!("PIT: channel 0 reload {} installs a {} ms tick", reload, period_ms);
        self.tick_period.set(period_ms);
    }

    /// Reprogramming channel 0 stops the tick and drops any IRQ0 backlog.
    fn retire_timer(&mut self) {
        self.pic.borrow_mut().clear_pending(0);
        self.tick_period.set(0.0);
    }

    fn note_on(&mut self) {
        let reload = self.channels[SPEAKER_CHANNEL].reload_value();
        let freq = PIT_FREQ / reload as f64;
        self.host.send(HostEvent::Beep(freq as f32));
    }

    fn note_off(&mut self) {
        self.host.send(HostEvent::Beep(0.0));
    }
}
