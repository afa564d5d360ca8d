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

    core::debugger.rs

    Debug console command interpreter. Parses the single-letter command lines
    the host forwards and drives the machine's debugger entry points; t, p, d
    and u repeat on an empty line, continuing where the previous command left
    off.
*/

use web_time::Instant;

use crate::machine::Machine;

const HELP_MESSAGE: &str = "Continue    G
Step        T
Dump Memory D [range]
Disassemble U [range]";

/// Console state between commands: the repeatable command and the resume
/// addresses for `d` and `u`.
#[derive(Default)]
pub struct Debugger {
    last_cmd: Option<String>,
    last_dump_addr: Option<u32>,
    last_disasm: Option<(u16, u32)>,
}

impl Debugger {
    /// Execute one console line. An empty line repeats the last repeatable
    /// command; an empty line with nothing to repeat is ignored.
    pub fn command(&mut self, machine: &mut Machine, line: &str, now: Instant) {
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            Some(word) => word.to_ascii_lowercase(),
            None => match self.last_cmd.take() {
                Some(last) => last,
                None => return,
            },
        };
        let args: Vec<&str> = parts.collect();
        machine.print(&format!("# {} {}", cmd, args.join(" ")));
        self.last_cmd = None;

        match cmd.as_str() {
            "?" => machine.print(HELP_MESSAGE),
            "g" => machine.resume(now),
            "r" => machine.show_registers(),
            "t" => {
                machine.step_once();
                self.last_cmd = Some(cmd);
            }
            "p" => {
                machine.step_over(now);
                self.last_cmd = Some(cmd);
            }
            "d" => {
                let base = args
                    .first()
                    .map(|token| parse_linear(machine, token))
                    .unwrap_or_else(|| Some(self.last_dump_addr.unwrap_or(0)));
                let count = args
                    .get(1)
                    .map(|token| machine.reg_or_value(token))
                    .unwrap_or(Some(256));
                let (Some(base), Some(count)) = (base, count) else {
                    machine.print("bad token");
                    return;
                };
                self.last_dump_addr = Some(machine.dump_memory(base, count));
                self.last_cmd = Some(cmd);
            }
            "u" => {
                let cs = machine.register("CS").unwrap_or(0) as u16;
                let vector = args
                    .first()
                    .map(|token| parse_vector(machine, token, cs))
                    .unwrap_or_else(|| {
                        Some(
                            self.last_disasm
                                .unwrap_or((cs, machine.register("IP").unwrap_or(0))),
                        )
                    });
                let count = args
                    .get(1)
                    .map(|token| machine.reg_or_value(token))
                    .unwrap_or(Some(10));
                let (Some((segment, offset)), Some(count)) = (vector, count) else {
                    machine.print("bad token");
                    return;
                };
                let len = machine.disassemble_at(segment, offset, count);
                if len > 0 {
                    self.last_disasm = Some((segment, offset.wrapping_add(len)));
                }
                self.last_cmd = Some(cmd);
            }
            _ => machine.print("command?"),
        }
    }
}

/// Parse `seg:off` or a bare `off` with the given default segment. Each part
/// is a register name or a hex literal.
fn parse_vector(machine: &Machine, token: &str, default_segment: u16) -> Option<(u16, u32)> {
    match token.split_once(':') {
        Some((seg, off)) => {
            let seg = machine.reg_or_value(seg)?;
            let off = machine.reg_or_value(off)?;
            Some((seg as u16, off))
        }
        None => Some((default_segment, machine.reg_or_value(token)?)),
    }
}

fn parse_linear(machine: &Machine, token: &str) -> Option<u32> {
    let (seg, off) = parse_vector(machine, token, 0)?;
    Some(machine.segment_base(seg).wrapping_add(off))
}
