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

    common::video.rs

    Video mode descriptor shared between the display device and host
    renderers.
*/

use serde_derive::{Deserialize, Serialize};

/// Set when the mode is a graphics mode (as opposed to text).
pub const MODE_FLAG_GRAPHICS: u8 = 0b0000_0001;
/// Set for the CGA interleaved-scanline framebuffer layout.
pub const MODE_FLAG_CGA: u8 = 0b0000_0010;

/// Parameters of a display mode as announced to the host: logical
/// resolution, virtual (scaled) presentation resolution, color depth and
/// layout flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoModeParams {
    pub dim: [u16; 2],
    pub vdim: [u16; 2],
    #[serde(rename = "bitsPerPixel", alias = "bpp")]
    pub bits_per_pixel: u8,
    #[serde(alias = "mode")]
    pub flags: u8,
}

impl VideoModeParams {
    /// Mode presented at its logical resolution.
    pub fn new(dim: [u16; 2], bits_per_pixel: u8, flags: u8) -> Self {
        Self { dim, vdim: dim, bits_per_pixel, flags }
    }

    /// Mode presented scaled up to a different virtual resolution.
    pub fn with_vdim(dim: [u16; 2], vdim: [u16; 2], bits_per_pixel: u8, flags: u8) -> Self {
        Self { dim, vdim, bits_per_pixel, flags }
    }

    pub fn is_graphics(&self) -> bool {
        self.flags & MODE_FLAG_GRAPHICS != 0
    }
}
