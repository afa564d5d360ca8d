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

    core::devices::rtc.rs

    MC146818 style CMOS RTC. Calendar registers read straight from the
    host clock (UTC) in BCD; everything else is plain battery backed RAM.
    There is no update cycle or alarm, and writes to the calendar indices
    land in RAM where the live clock shadows them.
*/

use std::{cell::RefCell, rc::Rc};

use web_time::{SystemTime, UNIX_EPOCH};

use crate::bus::IoBus;

pub const RTC_INDEX_PORT: u16 = 0x70;
pub const RTC_DATA_PORT: u16 = 0x71;

const CMOS_REG_SECONDS: u8 = 0x00;
const CMOS_REG_MINUTES: u8 = 0x02;
const CMOS_REG_HOURS: u8 = 0x04;
const CMOS_REG_DAY_OF_WEEK: u8 = 0x06;
const CMOS_REG_DAY_OF_MONTH: u8 = 0x07;
const CMOS_REG_MONTH: u8 = 0x08;
const CMOS_REG_YEAR: u8 = 0x09;
const CMOS_REG_CENTURY: u8 = 0x32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CalendarTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub weekday: u8, // 0 = Sunday
    pub day: u8,
    pub month: u8, // 1 = January
    pub year: u16,
}

/// Civil calendar fields for a unix timestamp, proleptic Gregorian.
fn civil_from_unix(secs: i64) -> CalendarTime {
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);
    // day zero of the epoch was a Thursday
    let weekday = (days + 4).rem_euclid(7) as u8;

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = (if month <= 2 { y + 1 } else { y }) as u16;

    CalendarTime {
        seconds: (tod % 60) as u8,
        minutes: (tod / 60 % 60) as u8,
        hours: (tod / 3600) as u8,
        weekday,
        day,
        month,
        year,
    }
}

fn to_bcd(value: u8) -> u8 {
    (value % 10) | ((value / 10) << 4)
}

pub struct Rtc {
    index: u8,
    ram: [u8; 256],
}

impl Rtc {
    pub fn new() -> Self {
        Self { index: 0, ram: [0; 256] }
    }

    pub fn create(bus: &mut IoBus) -> Rc<RefCell<Rtc>> {
        let rtc = Rc::new(RefCell::new(Rtc::new()));
        let r = rtc.clone();
        bus.map_write_u8(RTC_INDEX_PORT, move |_, data| r.borrow_mut().index = data);
        let r = rtc.clone();
        bus.map_read_u8(RTC_INDEX_PORT, move |_| r.borrow().index);
        let r = rtc.clone();
        bus.map_write_u8(RTC_DATA_PORT, move |_, data| r.borrow_mut().data_write(data));
        let r = rtc.clone();
        bus.map_read_u8(RTC_DATA_PORT, move |_| r.borrow().data_read());
        rtc
    }

    fn host_clock() -> CalendarTime {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        civil_from_unix(secs)
    }

    pub fn data_write(&mut self, data: u8) {
        self.ram[self.index as usize] = data;
    }

    pub fn data_read(&self) -> u8 {
        let now = Self::host_clock();
        match self.index {
            CMOS_REG_SECONDS => to_bcd(now.seconds),
            CMOS_REG_MINUTES => to_bcd(now.minutes),
            CMOS_REG_HOURS => to_bcd(now.hours),
            // the weekday register is binary even in BCD mode
            CMOS_REG_DAY_OF_WEEK => now.weekday,
            CMOS_REG_DAY_OF_MONTH => to_bcd(now.day),
            CMOS_REG_MONTH => to_bcd(now.month),
            CMOS_REG_YEAR => to_bcd((now.year % 100) as u8),
            CMOS_REG_CENTURY => to_bcd((now.year / 100) as u8),
            _ => self.ram[self.index as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HostSender;

    #[test]
    fn civil_conversion_epoch() {
        let t = civil_from_unix(0);
        assert_eq!((t.year, t.month, t.day), (1970, 1, 1));
        assert_eq!((t.hours, t.minutes, t.seconds), (0, 0, 0));
        // 1970-01-01 was a Thursday
        assert_eq!(t.weekday, 4);
    }

    #[test]
    fn civil_conversion_leap_day() {
        // 2024-02-29T12:34:56Z
        let t = civil_from_unix(1_709_164_800 + 12 * 3600 + 34 * 60 + 56);
        assert_eq!((t.year, t.month, t.day), (2024, 2, 29));
        assert_eq!((t.hours, t.minutes, t.seconds), (12, 34, 56));
        assert_eq!(t.weekday, 4);
    }

    #[test]
    fn civil_conversion_year_boundary() {
        // 1999-12-31T23:59:59Z
        let t = civil_from_unix(946_684_799);
        assert_eq!((t.year, t.month, t.day), (1999, 12, 31));
        assert_eq!((t.hours, t.minutes, t.seconds), (23, 59, 59));
    }

    #[test]
    fn bcd_encoding() {
        assert_eq!(to_bcd(0), 0x00);
        assert_eq!(to_bcd(7), 0x07);
        assert_eq!(to_bcd(42), 0x42);
        assert_eq!(to_bcd(59), 0x59);
    }

    #[test]
    fn cmos_ram_roundtrip_through_ports() {
        let (tx, _rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx);
        let _rtc = Rtc::create(&mut bus);
        bus.io_write_u8(RTC_INDEX_PORT, 0x10);
        assert_eq!(bus.io_read_u8(RTC_INDEX_PORT), 0x10);
        bus.io_write_u8(RTC_DATA_PORT, 0xAB);
        assert_eq!(bus.io_read_u8(RTC_DATA_PORT), 0xAB);
        // a different index reads different RAM
        bus.io_write_u8(RTC_INDEX_PORT, 0x11);
        assert_eq!(bus.io_read_u8(RTC_DATA_PORT), 0x00);
    }

    #[test]
    fn calendar_reads_are_bcd() {
        let (tx, _rx) = HostSender::new_pair();
        let mut bus = IoBus::new(tx);
        let _rtc = Rtc::create(&mut bus);
        for index in [0x00, 0x02, 0x04, 0x07, 0x08, 0x09, 0x32] {
            bus.io_write_u8(RTC_INDEX_PORT, index);
            let v = bus.io_read_u8(RTC_DATA_PORT);
            assert!(v & 0x0F <= 9, "index {:02X} low nibble not BCD: {:02X}", index, v);
            assert!(v >> 4 <= 9, "index {:02X} high nibble not BCD: {:02X}", index, v);
        }
        // the weekday register stays in range without BCD encoding
        bus.io_write_u8(RTC_INDEX_PORT, 0x06);
        assert!(bus.io_read_u8(RTC_DATA_PORT) < 7);
    }
}
