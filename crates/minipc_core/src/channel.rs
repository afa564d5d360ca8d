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

    core::channel.rs

    Core-to-host event channel. Devices hold a cloned sender and post
    display, sound and debug events as they occur; the host front end
    drains the receiving end at its leisure.
*/

use crossbeam_channel::{Receiver, Sender};

use minipc_common::HostEvent;

#[derive(Clone)]
pub struct HostSender {
    sender: Sender<HostEvent>,
}

impl HostSender {
    pub fn new_pair() -> (HostSender, Receiver<HostEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (HostSender { sender }, receiver)
    }

    /// Post an event to the host. A disconnected host is not an error;
    /// the event is dropped.
    pub fn send(&self, event: HostEvent) {
        _ = self.sender.send(event);
    }
}
