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

    core::cpu.rs

    The CPU core seam. The scheduler treats the CPU as an opaque unit of
    execution behind the CpuCore trait; any core that can run a burst of
    instructions against the I/O bus and report a scheduling status plugs
    in here.
*/

use core::fmt::Display;
use std::{cell::RefCell, error::Error, rc::Rc};

use crate::{bus::IoBus, devices::pic::Pic, memory::GuestMemory};

/// Budget exhausted without incident; reschedule immediately.
pub const STATUS_PERIODIC: u32 = 0;
/// Debug trap (breakpoint, ICEBP); the scheduler pauses for the debugger.
pub const STATUS_DEBUG_TRAP: u32 = 4;
/// HLT with interrupts enabled; sleep until the next timer tick.
pub const STATUS_HALT: u32 = 0x1000;
/// Statuses at or above this are unrecoverable; the machine halts.
pub const STATUS_EXCEPTION: u32 = 0x1_0000;
/// Guest-initiated shutdown, reported as the first exception code.
pub const STATUS_SHUTDOWN: u32 = 0x1_0001;

/// Scheduling status returned by a CPU execution burst. Codes below the
/// halt threshold other than those named above are treated as ordinary
/// "keep running" statuses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CpuStatus(pub u32);

impl CpuStatus {
    pub fn code(self) -> u32 {
        self.0
    }
    pub fn is_debug_trap(self) -> bool {
        self.0 == STATUS_DEBUG_TRAP
    }
    pub fn is_halt(self) -> bool {
        self.0 == STATUS_HALT
    }
    pub fn is_exception(self) -> bool {
        self.0 >= STATUS_EXCEPTION
    }
    pub fn is_shutdown(self) -> bool {
        self.0 == STATUS_SHUTDOWN
    }
}

impl From<u32> for CpuStatus {
    fn from(code: u32) -> Self {
        CpuStatus(code)
    }
}

impl Display for CpuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:05X}", self.0)
    }
}

/// A fault in the core itself, as opposed to an architectural exception
/// the guest can observe. Faults abort the current burst.
#[derive(Debug)]
pub enum CpuFault {
    Memory(crate::memory::MemError),
    Internal(String),
}
impl Error for CpuFault {}
impl Display for CpuFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuFault::Memory(e) => write!(f, "CPU memory fault: {}", e),
            CpuFault::Internal(s) => write!(f, "CPU internal fault: {}", s),
        }
    }
}
impl From<crate::memory::MemError> for CpuFault {
    fn from(e: crate::memory::MemError) -> Self {
        CpuFault::Memory(e)
    }
}

/// Everything a CPU core may touch outside its own state during a burst:
/// the port I/O bus, and the interrupt controller for INTA cycles.
///
/// Guest memory is not part of this context. A core receives its own
/// handle in init_memory and must not hold a borrow of it across a port
/// access; DMA capable devices borrow the same buffer from their port
/// handlers.
pub struct CpuIo<'a> {
    pub bus: &'a mut IoBus,
    pub pic: &'a RefCell<Pic>,
}

impl CpuIo<'_> {
    /// Acknowledge the highest priority pending interrupt and fetch its
    /// vector, as the INTA bus cycle would.
    pub fn dequeue_irq(&mut self) -> u8 {
        self.pic.borrow_mut().dequeue_irq()
    }
}

pub trait CpuCore {
    /// Take a handle to guest memory and lay it out for `size_kb`
    /// kilobytes of RAM. Returns the buffer offset of guest physical
    /// address zero. Cores allocate at least one megabyte of guest
    /// address space so the adapter windows below 0x100000 are always
    /// addressable.
    fn init_memory(&mut self, mem: &Rc<RefCell<GuestMemory>>, size_kb: u32)
        -> Result<u32, CpuFault>;

    /// Reset to the power-on state. `generation` selects the CPU
    /// generation to emulate; `None` keeps the current one.
    fn reset(&mut self, generation: Option<u8>);

    /// Execute instructions until roughly `budget` cycles are spent or a
    /// scheduling event occurs, whichever comes first.
    fn run(&mut self, io: &mut CpuIo<'_>, budget: u32) -> Result<CpuStatus, CpuFault>;

    /// Execute a single instruction.
    fn step(&mut self, io: &mut CpuIo<'_>) -> Result<CpuStatus, CpuFault>;

    /// Names of all addressable registers. The set is fixed for the
    /// lifetime of the core.
    fn register_names(&self) -> Vec<String>;

    fn get_register(&self, name: &str) -> Option<u32>;

    /// Returns false if the register does not exist.
    fn set_register(&mut self, name: &str, value: u32) -> bool;

    /// Linear base address of a segment selector in the current CPU mode.
    fn segment_base(&self, selector: u16) -> u32;

    /// Disassemble `count` instructions at `segment:offset`. Returns the
    /// listing and the total byte length of the decoded instructions.
    fn disassemble(&mut self, segment: u16, offset: u32, count: u32) -> (String, u32);

    /// Arm a one-shot execution breakpoint. Hitting it ends the burst
    /// with STATUS_DEBUG_TRAP.
    fn set_breakpoint(&mut self, segment: u16, offset: u32);

    /// Human readable register dump for the debug console.
    fn dump_state(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(CpuStatus(STATUS_HALT).is_halt());
        assert!(CpuStatus(STATUS_DEBUG_TRAP).is_debug_trap());
        assert!(CpuStatus(STATUS_SHUTDOWN).is_exception());
        assert!(CpuStatus(STATUS_SHUTDOWN).is_shutdown());
        assert!(CpuStatus(0x1_0002).is_exception());
        assert!(!CpuStatus(0x1_0002).is_shutdown());
        assert!(!CpuStatus(STATUS_PERIODIC).is_exception());
        assert_eq!(format!("{}", CpuStatus(0x1000)), "01000");
    }
}
