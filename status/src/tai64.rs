//! TAI64 and TAI64N time labels.
//!
//! Every timestamp in a status block is a TAI64 label: `2^62` plus the number
//! of TAI seconds since 1970-01-01 00:00:00 TAI. Converting to and from civil
//! (UTC) time needs the list of leap seconds inserted since 1972, which is
//! embedded here.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Label of the TAI64 epoch.
pub const TAI64_EPOCH: u64 = 0x4000_0000_0000_0000;

/// TAI - UTC before the first leap second was inserted.
const BASE_OFFSET: i64 = 10;

/// UTC instants (Unix seconds) at which each leap second took effect.
const LEAP_SECONDS: [i64; 27] = [
    78_796_800,    // 1972-07-01
    94_694_400,    // 1973-01-01
    126_230_400,   // 1974-01-01
    157_766_400,   // 1975-01-01
    189_302_400,   // 1976-01-01
    220_924_800,   // 1977-01-01
    252_460_800,   // 1978-01-01
    283_996_800,   // 1979-01-01
    315_532_800,   // 1980-01-01
    362_793_600,   // 1981-07-01
    394_329_600,   // 1982-07-01
    425_865_600,   // 1983-07-01
    489_024_000,   // 1985-07-01
    567_993_600,   // 1988-01-01
    631_152_000,   // 1990-01-01
    662_688_000,   // 1991-01-01
    709_948_800,   // 1992-07-01
    741_484_800,   // 1993-07-01
    773_020_800,   // 1994-07-01
    820_454_400,   // 1996-01-01
    867_715_200,   // 1997-07-01
    915_148_800,   // 1999-01-01
    1_136_073_600, // 2006-01-01
    1_230_768_000, // 2009-01-01
    1_341_100_800, // 2012-07-01
    1_435_708_800, // 2015-07-01
    1_483_228_800, // 2017-01-01
];

/// TAI - UTC in effect at the given Unix time.
pub fn tai_utc_offset(unix: i64) -> i64 {
    let inserted = LEAP_SECONDS.iter().take_while(|&&at| at <= unix).count();
    BASE_OFFSET + inserted as i64
}

/// A TAI64 label with one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tai64(pub u64);

impl Tai64 {
    /// Label for a Unix (UTC) time.
    pub fn from_unix(unix: i64) -> Self {
        let tai = unix.saturating_add(tai_utc_offset(unix));
        Tai64(TAI64_EPOCH.wrapping_add(tai as u64))
    }

    /// Unix (UTC) time of this label, `None` if it does not fit an `i64`.
    ///
    /// A label falling on an inserted leap second maps to the first second
    /// after it.
    pub fn to_unix(self) -> Option<i64> {
        let tai = self.0.wrapping_sub(TAI64_EPOCH) as i64;
        let mut offset = BASE_OFFSET;
        for (inserted, &at) in LEAP_SECONDS.iter().enumerate() {
            if tai >= at + BASE_OFFSET + inserted as i64 + 1 {
                offset = BASE_OFFSET + inserted as i64 + 1;
            } else {
                break;
            }
        }
        tai.checked_sub(offset)
    }

    /// Decode an 8-byte big-endian label.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Tai64(u64::from_be_bytes(bytes))
    }

    /// Encode as an 8-byte big-endian label.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Whether this is the all-zero label written for "never".
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Civil time of this label.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self.is_zero() {
            return None;
        }
        Utc.timestamp_opt(self.to_unix()?, 0).single()
    }
}

/// A TAI64N label: TAI64 seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tai64N {
    /// Seconds label
    pub secs: Tai64,
    /// Nanoseconds within the second (0..1_000_000_000)
    pub nanos: u32,
}

impl Tai64N {
    /// Create a label from its parts.
    pub fn new(secs: Tai64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// The current time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Label for a system clock reading.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(Tai64::from_unix(since.as_secs() as i64), since.subsec_nanos()),
            Err(before) => {
                let before = before.duration();
                Self::new(Tai64::from_unix(-(before.as_secs() as i64)), 0)
            }
        }
    }

    /// Decode the 12-byte big-endian form.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        secs.copy_from_slice(&bytes[..8]);
        nanos.copy_from_slice(&bytes[8..]);
        Self::new(Tai64::from_bytes(secs), u32::from_be_bytes(nanos))
    }

    /// Encode the 12-byte big-endian form.
    pub fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.secs.to_bytes());
        out[8..].copy_from_slice(&self.nanos.to_be_bytes());
        out
    }

    /// Civil time of this label.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self.secs.is_zero() {
            return None;
        }
        Utc.timestamp_opt(self.secs.to_unix()?, self.nanos.min(999_999_999))
            .single()
    }

    /// Whole seconds elapsed from this label until `now`, zero if in the future.
    pub fn seconds_until(self, now: Tai64N) -> u64 {
        now.secs.0.saturating_sub(self.secs.0)
    }
}
