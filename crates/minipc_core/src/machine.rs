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

    core::machine.rs

    The assembled machine and its cooperative scheduler. A Machine owns guest
    memory, the port I/O bus with every device mapped onto it, and one CPU
    core behind the CpuCore trait. The host front end owns the actual loop;
    run() performs a single scheduler iteration (timer catch-up, one budgeted
    CPU burst, device housekeeping) and reports when the next one is due.
*/

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use anyhow::bail;
use crossbeam_channel::Receiver;
use strum_macros::Display;
use web_time::{Duration, Instant};

use minipc_common::{HostCommand, HostEvent, MachineConfig};

use crate::{
    bus::IoBus,
    channel::HostSender,
    cpu::{CpuCore, CpuIo, CpuStatus, STATUS_EXCEPTION},
    debugger::Debugger,
    devices::{
        fdc::FloppyController,
        mpu401::{Mpu401, MPU401_DEFAULT_BASE},
        pci::Pci,
        pic::Pic,
        pit::Pit,
        ps2::Ps2Controller,
        rtc::Rtc,
        serial::{Uart, COM1_DEFAULT_BASE, COM1_DEFAULT_IRQ},
        vga::Vga,
    },
    memory::{GuestMemory, MemError},
};

/// Cycle budget handed to the CPU core for one scheduler burst.
pub const RUN_BUDGET: u32 = 0x20_0000;

/// Word reads here return a fresh random value (guest PRNG seeding).
pub const ENTROPY_PORT: u16 = 0x0000;
/// A byte write here requests a warm reset, honored at the top of the next
/// scheduler iteration rather than inside the port access.
pub const RESET_PORT: u16 = 0x0CF9;
/// Word read: conventional memory size in KB.
pub const MEMORY_CONFIG_LOW_PORT: u16 = 0xFC00;
/// Word read: extended memory above 1MB in KB.
pub const MEMORY_CONFIG_HIGH_PORT: u16 = 0xFC02;

const BOOT_SECTOR_OFFSET: u32 = 0x7C00;

/// What the host loop should do after a scheduler iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchedulerYield {
    /// Run again as soon as the loop comes around.
    Immediate,
    /// Nothing will happen before this deadline; the CPU is halted waiting
    /// for the timer.
    SleepUntil(Instant),
    /// No burst is due. Wait for a host command.
    Suspended,
}

/// Why a machine stopped executing for good.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HaltReason {
    /// The guest requested power-off.
    Shutdown,
    /// Unrecoverable CPU status, carrying its code.
    Exception(u32),
}

impl core::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            HaltReason::Shutdown => write!(f, "shutdown"),
            HaltReason::Exception(code) => write!(f, "exception {:05X}", code),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum ExecutionState {
    /// Constructed but not yet started.
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "running")]
    Running,
    /// Stopped at a breakpoint or on host request; the debugger has control.
    #[strum(to_string = "debug")]
    DebugPaused,
    #[strum(to_string = "halted ({reason})")]
    Halted { reason: HaltReason },
}

/// An assembled virtual machine.
///
/// Construction wires every device onto the bus and leaves the machine
/// idle; `start()` loads the firmware and boots it. After that the host
/// alternates between `run(now)` and `apply(command, now)`, honoring the
/// returned [`SchedulerYield`] between calls.
pub struct Machine {
    config: MachineConfig,
    bus: IoBus,
    mem: Rc<RefCell<GuestMemory>>,
    pic: Rc<RefCell<Pic>>,
    uart: Rc<RefCell<Uart>>,
    ps2: Rc<RefCell<Ps2Controller>>,
    vga: Rc<RefCell<Vga>>,
    fdc: Rc<RefCell<FloppyController>>,
    cpu: Box<dyn CpuCore>,
    host: HostSender,
    events: Receiver<HostEvent>,
    state: ExecutionState,
    /// Set by NMI while running; forces a debug pause at the next burst
    /// boundary.
    debug_requested: bool,
    /// Set by the reset port handler; consumed at the top of run().
    reset_requested: Rc<Cell<bool>>,
    /// IRQ0 period in milliseconds, written by the PIT. Zero means the
    /// timer is not programmed.
    tick_period: Rc<Cell<f64>>,
    last_tick: Instant,
    firmware: Vec<u8>,
    debugger: Debugger,
}

impl Machine {
    pub fn new(
        config: MachineConfig,
        mut cpu: Box<dyn CpuCore>,
        firmware: Vec<u8>,
    ) -> anyhow::Result<Machine> {
        if config.memory_kb == 0 {
            bail!("guest memory size must be nonzero");
        }
        if firmware.len() < 2 {
            bail!("firmware image too small to carry a load origin");
        }

        let (host, events) = HostSender::new_pair();
        let mem = Rc::new(RefCell::new(GuestMemory::new()));
        let origin = cpu.init_memory(&mem, config.memory_kb)?;
        mem.borrow_mut().set_origin(origin);

        let mut bus = IoBus::new(host.clone());
        bus.set_redirect_map(&config.io_redirect_map);

        let pic = Pic::create(&mut bus);
        let tick_period = Rc::new(Cell::new(0.0));
        Pit::create(&mut bus, pic.clone(), tick_period.clone(), host.clone());
        let uart = Uart::create(&mut bus, COM1_DEFAULT_BASE, COM1_DEFAULT_IRQ, pic.clone());
        Rtc::create(&mut bus);
        Pci::create(&mut bus);
        let ps2 = Ps2Controller::create(&mut bus, pic.clone());
        let vga = Vga::create(&mut bus, host.clone());
        let fdc = FloppyController::create(&mut bus, &mem);
        if config.midi {
            Mpu401::create(&mut bus, MPU401_DEFAULT_BASE, host.clone());
        }

        let reset_requested = Rc::new(Cell::new(false));
        let flag = reset_requested.clone();
        bus.map_write_u8(RESET_PORT, move |_, _| flag.set(true));
        bus.map_read_u16(ENTROPY_PORT, |_| rand::random::<u16>());

        let (low, high) = if config.memory_kb < 1024 {
            (config.memory_kb as u16, 0)
        } else {
            (640, (config.memory_kb - 1024) as u16)
        };
        bus.map_read_u16(MEMORY_CONFIG_LOW_PORT, move |_| low);
        bus.map_read_u16(MEMORY_CONFIG_HIGH_PORT, move |_| high);

        Ok(Machine {
            config,
            bus,
            mem,
            pic,
            uart,
            ps2,
            vga,
            fdc,
            cpu,
            host,
            events,
            state: ExecutionState::Idle,
            debug_requested: false,
            reset_requested,
            tick_period,
            last_tick: Instant::now(),
            firmware,
            debugger: Debugger::default(),
        })
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// A clone of the host event receiver. Events accumulate whether or
    /// not anyone is draining them.
    pub fn events(&self) -> Receiver<HostEvent> {
        self.events.clone()
    }

    /// Boot the machine: load the firmware, reset the CPU to the configured
    /// generation and enter the running state.
    pub fn start(&mut self, now: Instant) {
        if self.state != ExecutionState::Idle {
            log::warn!("Machine: start ignored in state {}", self.state);
            return;
        }
        if let Err(e) = self.load_firmware() {
            log::error!("Machine: firmware load failed: {}", e);
            self.host
                .send(HostEvent::Alert(format!("firmware load failed: {}", e)));
            return;
        }
        if let Some(name) = &self.config.image_name {
            log::info!("Machine: starting, image {}", name);
        }
        self.cpu.reset(Some(self.config.generation));
        if self.config.break_on_boot_sector {
            self.cpu.set_breakpoint(0, BOOT_SECTOR_OFFSET);
        }
        self.state = ExecutionState::Running;
        self.last_tick = now;
    }

    /// Warm reset: reload the firmware and reset the CPU. `generation`
    /// switches the CPU generation; `None` keeps the current one. A halted
    /// or debug-paused machine resumes running.
    pub fn reset(&mut self, generation: Option<u8>, now: Instant) {
        if self.state == ExecutionState::Idle {
            return;
        }
        log::debug!("Machine: reset, generation {:?}", generation);
        if let Err(e) = self.load_firmware() {
            log::error!("Machine: firmware reload failed: {}", e);
            self.host
                .send(HostEvent::Alert(format!("firmware reload failed: {}", e)));
            return;
        }
        self.cpu.reset(generation);
        if self.state != ExecutionState::Running {
            self.state = ExecutionState::Running;
            self.last_tick = now;
        }
    }

    /// One scheduler iteration: deliver overdue timer ticks, run a single
    /// CPU burst, drain device output, then decide how the loop should
    /// proceed based on the burst status.
    pub fn run(&mut self, now: Instant) -> SchedulerYield {
        if self.reset_requested.take() {
            self.reset(None, now);
        }
        if self.state != ExecutionState::Running {
            return SchedulerYield::Suspended;
        }

        self.catch_up_ticks(now);

        let mut io = CpuIo {
            bus: &mut self.bus,
            pic: &self.pic,
        };
        let status = match self.cpu.run(&mut io, RUN_BUDGET) {
            Ok(status) => status,
            Err(fault) => {
                log::error!("Machine: {}", fault);
                self.host.send(HostEvent::Alert(format!("CPU fault: {}", fault)));
                CpuStatus(STATUS_EXCEPTION)
            }
        };
        self.drain_uart();
        self.vga.borrow_mut().poll(now, &self.mem.borrow());

        if status.is_exception() {
            let reason = if status.is_shutdown() {
                HaltReason::Shutdown
            } else {
                HaltReason::Exception(status.code())
            };
            log::debug!("Machine: halted, {}", reason);
            self.state = ExecutionState::Halted { reason };
            if !status.is_shutdown() {
                self.print(&self.cpu.dump_state());
            }
            return SchedulerYield::Suspended;
        }
        if self.debug_requested || status.is_debug_trap() {
            self.debug_requested = false;
            self.state = ExecutionState::DebugPaused;
            self.print(&self.cpu.dump_state());
            self.host.send(HostEvent::DebugReaction);
            return SchedulerYield::Suspended;
        }
        if status.is_halt() {
            if let Some(step) = self.tick_step() {
                // Nothing can happen before the next timer tick.
                return SchedulerYield::SleepUntil((self.last_tick + step).max(now));
            }
        }
        SchedulerYield::Immediate
    }

    /// Apply one host command and report whether the loop should keep
    /// running or wait for further input.
    pub fn apply(&mut self, command: HostCommand, now: Instant) -> SchedulerYield {
        match command {
            HostCommand::Reset { generation } => self.reset(generation, now),
            HostCommand::Key { input } => self.ps2.borrow_mut().key_input(&input),
            HostCommand::Pointer { input } => self.ps2.borrow_mut().pointer_input(&input),
            HostCommand::Attach { disk_image_bytes } => self.attach_floppy(disk_image_bytes),
            HostCommand::Debug { command_line } => self.debug_command(&command_line, now),
            HostCommand::Nmi => self.nmi(),
        }
        if self.state == ExecutionState::Running {
            SchedulerYield::Immediate
        } else {
            SchedulerYield::Suspended
        }
    }

    /// Host break request. While running, pause at the next burst boundary;
    /// while paused or halted, execute a single instruction and dump state.
    pub fn nmi(&mut self) {
        match self.state {
            ExecutionState::Idle => {}
            ExecutionState::Running => {
                self.debug_requested = true;
                self.drain_uart();
            }
            _ => {
                self.step_once();
                self.drain_uart();
            }
        }
    }

    fn attach_floppy(&mut self, image: Vec<u8>) {
        let bytes = image.len();
        match self.fdc.borrow_mut().attach_image(image) {
            Ok(()) => log::debug!("Machine: attached {} byte floppy image", bytes),
            Err(e) => {
                log::error!("Machine: floppy attach failed: {}", e);
                self.host.send(HostEvent::Alert(e.to_string()));
            }
        }
    }

    fn debug_command(&mut self, line: &str, now: Instant) {
        // The debugger drives the machine mutably; it cannot stay a field
        // borrow while it does.
        let mut debugger = std::mem::take(&mut self.debugger);
        debugger.command(self, line, now);
        self.debugger = debugger;
        self.drain_uart();
        self.host.send(HostEvent::DebugReaction);
    }

    /// Raise IRQ0 once per timer period elapsed since the last delivered
    /// tick. Delivery is bursty after a long sleep; the PIC holds the
    /// backlog as a pending count.
    fn catch_up_ticks(&mut self, now: Instant) {
        let Some(step) = self.tick_step() else {
            return;
        };
        let mut pic = self.pic.borrow_mut();
        while now >= self.last_tick + step {
            pic.raise_irq(0);
            self.last_tick += step;
        }
    }

    fn tick_step(&self) -> Option<Duration> {
        let period_ms = self.tick_period.get();
        if period_ms > 0.0 {
            Some(Duration::from_secs_f64(period_ms / 1000.0))
        } else {
            None
        }
    }

    fn drain_uart(&mut self) {
        if let Some(text) = self.uart.borrow_mut().drain_tx() {
            self.host.send(HostEvent::Write(text));
        }
    }

    /// Copy the firmware blob to its self-described origin: the first two
    /// bytes hold the paragraph address of the image.
    fn load_firmware(&mut self) -> Result<(), MemError> {
        let paragraph = u32::from(self.firmware[0]) | (u32::from(self.firmware[1]) << 8);
        self.mem.borrow_mut().dma_write(paragraph << 4, &self.firmware)
    }

    // Debugger support. The debugger module parses command lines and calls
    // back into these.

    /// Send one line (or block) of text to the host terminal.
    pub(crate) fn print(&self, text: &str) {
        self.host.send(HostEvent::Write(format!("{}\n", text)));
    }

    /// Execute a single instruction and dump the resulting CPU state.
    pub(crate) fn step_once(&mut self) {
        let mut io = CpuIo {
            bus: &mut self.bus,
            pic: &self.pic,
        };
        let status = match self.cpu.step(&mut io) {
            Ok(status) => status,
            Err(fault) => {
                log::error!("Machine: {}", fault);
                CpuStatus(STATUS_EXCEPTION)
            }
        };
        if status.is_exception() {
            self.print(&format!("#### Exception Occurred ({})", status));
        }
        self.print(&self.cpu.dump_state());
    }

    /// Plant a breakpoint just past the current instruction and resume;
    /// falls back to a plain step when the instruction cannot be measured.
    pub(crate) fn step_over(&mut self, now: Instant) {
        let (Some(cs), Some(ip)) = (self.register("CS"), self.register("IP")) else {
            self.step_once();
            return;
        };
        let (_, len) = self.cpu.disassemble(cs as u16, ip, 1);
        if len > 0 {
            self.cpu.set_breakpoint(cs as u16, ip + len);
            self.state = ExecutionState::Running;
            self.last_tick = now;
        } else {
            self.step_once();
        }
    }

    /// Leave the debug pause and resume execution.
    pub(crate) fn resume(&mut self, now: Instant) {
        if self.state == ExecutionState::DebugPaused {
            self.state = ExecutionState::Running;
            self.last_tick = now;
        }
    }

    pub(crate) fn show_registers(&self) {
        self.print(&self.cpu.dump_state());
    }

    /// Hex/ASCII dump of `count` bytes from linear address `base`, rounded
    /// up to whole 16-byte rows. Returns the first address past the dump.
    pub(crate) fn dump_memory(&self, base: u32, count: u32) -> u32 {
        let count = (count + 15) & !15;
        let mem = self.mem.borrow();
        let mut text = String::new();
        for row in 0..count / 16 {
            let addr = base.wrapping_add(row * 16);
            let mut ascii = String::with_capacity(16);
            text.push_str(&format!("{:08X}", addr));
            for i in 0..16 {
                match mem.dma_read(addr.wrapping_add(i), 1) {
                    Ok(byte) => {
                        text.push_str(&format!(" {:02X}", byte[0]));
                        ascii.push(if (0x20..0x7F).contains(&byte[0]) {
                            byte[0] as char
                        } else {
                            '.'
                        });
                    }
                    Err(_) => {
                        text.push_str(" ??");
                        ascii.push('.');
                    }
                }
            }
            text.push_str("  ");
            text.push_str(&ascii);
            text.push('\n');
        }
        self.print(text.trim_end_matches('\n'));
        base.wrapping_add(count)
    }

    /// Disassemble `count` instructions at `segment:offset` to the terminal.
    /// Returns the byte length of the decoded instructions.
    pub(crate) fn disassemble_at(&mut self, segment: u16, offset: u32, count: u32) -> u32 {
        let (listing, len) = self.cpu.disassemble(segment, offset, count);
        self.print(&listing);
        len
    }

    pub(crate) fn register(&self, name: &str) -> Option<u32> {
        self.cpu.get_register(name)
    }

    pub(crate) fn segment_base(&self, selector: u16) -> u32 {
        self.cpu.segment_base(selector)
    }

    /// Resolve a debugger token: a register name (an `E` prefix falls back
    /// to the bare name), else a hex literal.
    pub(crate) fn reg_or_value(&self, token: &str) -> Option<u32> {
        let token = token.to_ascii_uppercase();
        if let Some(value) = self.cpu.get_register(&token) {
            return Some(value);
        }
        if let Some(rest) = token.strip_prefix('E') {
            if let Some(value) = self.cpu.get_register(rest) {
                return Some(value);
            }
        }
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return u32::from_str_radix(&token, 16).ok();
        }
        None
    }
}
