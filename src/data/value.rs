//! Dynamically typed values carried by nodes
//!
//! [`Value`] is the leaf payload of every [`Node`](super::Node): document
//! templates and live protocol content alike. Each variant can be coerced into
//! any other representation through the `as_*` accessors, which never panic
//! and return `None` when a conversion is impossible or out of range. Codecs
//! and the structural matcher rely on this to compare values whose declared
//! type is not known in advance.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, Timelike, Utc};
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Discriminant of a [`Value`], used to request conversions by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ValueKind {
    Empty,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Char,
    String,
    Binary,
    DateTime,
    Date,
    Time,
    Duration,
    IpAddress,
    Collection,
    Array,
}

impl ValueKind {
    /// Canonical name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Empty => "Empty",
            ValueKind::Boolean => "Boolean",
            ValueKind::Int8 => "Int8",
            ValueKind::Int16 => "Int16",
            ValueKind::Int32 => "Int32",
            ValueKind::Int64 => "Int64",
            ValueKind::UInt8 => "UInt8",
            ValueKind::UInt16 => "UInt16",
            ValueKind::UInt32 => "UInt32",
            ValueKind::UInt64 => "UInt64",
            ValueKind::Float16 => "Float16",
            ValueKind::Float32 => "Float32",
            ValueKind::Float64 => "Float64",
            ValueKind::Char => "Char",
            ValueKind::String => "String",
            ValueKind::Binary => "Binary",
            ValueKind::DateTime => "DateTime",
            ValueKind::Date => "Date",
            ValueKind::Time => "Time",
            ValueKind::Duration => "Duration",
            ValueKind::IpAddress => "IPAddress",
            ValueKind::Collection => "Collection",
            ValueKind::Array => "Array",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire-relevant primitive or container value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    #[default]
    Empty,
    /// Boolean flag.
    Boolean(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Half-precision float.
    Float16(f16),
    /// Single-precision float.
    Float32(f32),
    /// Double-precision float.
    Float64(f64),
    /// Unicode scalar value.
    Char(char),
    /// UTF-8 text.
    String(String),
    /// Raw octets.
    Binary(Vec<u8>),
    /// Instant with a UTC offset.
    DateTime(DateTime<FixedOffset>),
    /// Calendar date.
    Date(NaiveDate),
    /// Wall-clock time of day.
    Time(NaiveTime),
    /// Signed time span.
    Duration(#[serde(with = "duration_serde")] TimeDelta),
    /// IPv4 or IPv6 address.
    IpAddress(IpAddr),
    /// Heterogeneous ordered values.
    Collection(Vec<Value>),
    /// Homogeneous ordered values.
    Array(Vec<Value>),
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Empty => ValueKind::Empty,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt8(_) => ValueKind::UInt8,
            Value::UInt16(_) => ValueKind::UInt16,
            Value::UInt32(_) => ValueKind::UInt32,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float16(_) => ValueKind::Float16,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::Char(_) => ValueKind::Char,
            Value::String(_) => ValueKind::String,
            Value::Binary(_) => ValueKind::Binary,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Duration(_) => ValueKind::Duration,
            Value::IpAddress(_) => ValueKind::IpAddress,
            Value::Collection(_) => ValueKind::Collection,
            Value::Array(_) => ValueKind::Array,
        }
    }

    /// Whether this is the absent value.
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Whether this value holds raw octets.
    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }

    /// Canonical text form. `Empty` renders as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Boolean(flag) => flag.to_string(),
            Value::Int8(num) => num.to_string(),
            Value::Int16(num) => num.to_string(),
            Value::Int32(num) => num.to_string(),
            Value::Int64(num) => num.to_string(),
            Value::UInt8(num) => num.to_string(),
            Value::UInt16(num) => num.to_string(),
            Value::UInt32(num) => num.to_string(),
            Value::UInt64(num) => num.to_string(),
            Value::Float16(num) => num.to_string(),
            Value::Float32(num) => num.to_string(),
            Value::Float64(num) => num.to_string(),
            Value::Char(ch) => ch.to_string(),
            Value::String(text) => text.clone(),
            Value::Binary(bytes) => format_hex(bytes),
            Value::DateTime(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            Value::Date(date) => date.format("%Y-%m-%d").to_string(),
            Value::Time(time) => time.format("%H:%M:%S%.f").to_string(),
            Value::Duration(span) => format_duration(span),
            Value::IpAddress(addr) => addr.to_string(),
            Value::Collection(items) | Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_text).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Parse the canonical text form of a scalar kind.
    ///
    /// Inverse of [`Value::to_text`] for every kind except the containers,
    /// which have no unambiguous text form and always yield `None`.
    pub fn parse_as(kind: ValueKind, text: &str) -> Option<Value> {
        match kind {
            ValueKind::Empty => text.is_empty().then_some(Value::Empty),
            ValueKind::String => Some(Value::String(text.to_string())),
            ValueKind::Binary => parse_hex(text).map(Value::Binary),
            ValueKind::Collection | ValueKind::Array => None,
            other => Value::String(text.to_string()).convert(other),
        }
    }

    /// Coerce into the requested kind.
    pub fn convert(&self, kind: ValueKind) -> Option<Value> {
        match kind {
            ValueKind::Empty => Some(Value::Empty),
            ValueKind::Boolean => self.as_bool().map(Value::Boolean),
            ValueKind::Int8 => self.as_i8().map(Value::Int8),
            ValueKind::Int16 => self.as_i16().map(Value::Int16),
            ValueKind::Int32 => self.as_i32().map(Value::Int32),
            ValueKind::Int64 => self.as_i64().map(Value::Int64),
            ValueKind::UInt8 => self.as_u8().map(Value::UInt8),
            ValueKind::UInt16 => self.as_u16().map(Value::UInt16),
            ValueKind::UInt32 => self.as_u32().map(Value::UInt32),
            ValueKind::UInt64 => self.as_u64().map(Value::UInt64),
            ValueKind::Float16 => self.as_f16().map(Value::Float16),
            ValueKind::Float32 => self.as_f32().map(Value::Float32),
            ValueKind::Float64 => self.as_f64().map(Value::Float64),
            ValueKind::Char => self.as_char().map(Value::Char),
            ValueKind::String => self.as_string().map(Value::String),
            ValueKind::Binary => self.as_bytes().map(Value::Binary),
            ValueKind::DateTime => self.as_datetime().map(Value::DateTime),
            ValueKind::Date => self.as_date().map(Value::Date),
            ValueKind::Time => self.as_time().map(Value::Time),
            ValueKind::Duration => self.as_duration().map(Value::Duration),
            ValueKind::IpAddress => self.as_ip_addr().map(Value::IpAddress),
            ValueKind::Collection => match self {
                Value::Collection(items) | Value::Array(items) => {
                    Some(Value::Collection(items.clone()))
                }
                Value::Empty => None,
                other => Some(Value::Collection(vec![other.clone()])),
            },
            ValueKind::Array => match self {
                Value::Collection(items) | Value::Array(items) => {
                    let homogeneous = items.windows(2).all(|w| w[0].kind() == w[1].kind());
                    homogeneous.then(|| Value::Array(items.clone()))
                }
                Value::Empty => None,
                other => Some(Value::Array(vec![other.clone()])),
            },
        }
    }

    /// Coerce to a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => self.as_f64().map(|num| num != 0.0),
            },
            Value::Float16(_) | Value::Float32(_) | Value::Float64(_) => {
                self.as_f64().map(|num| num != 0.0)
            }
            _ => self.as_i128().map(|num| num != 0),
        }
    }

    /// Coerce to a signed 8-bit integer.
    pub fn as_i8(&self) -> Option<i8> {
        self.as_i128().and_then(|v| i8::try_from(v).ok())
    }

    /// Coerce to a signed 16-bit integer.
    pub fn as_i16(&self) -> Option<i16> {
        self.as_i128().and_then(|v| i16::try_from(v).ok())
    }

    /// Coerce to a signed 32-bit integer.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i128().and_then(|v| i32::try_from(v).ok())
    }

    /// Coerce to a signed 64-bit integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Coerce to an unsigned 8-bit integer.
    pub fn as_u8(&self) -> Option<u8> {
        self.as_i128().and_then(|v| u8::try_from(v).ok())
    }

    /// Coerce to an unsigned 16-bit integer.
    pub fn as_u16(&self) -> Option<u16> {
        self.as_i128().and_then(|v| u16::try_from(v).ok())
    }

    /// Coerce to an unsigned 32-bit integer.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i128().and_then(|v| u32::try_from(v).ok())
    }

    /// Coerce to an unsigned 64-bit integer.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Coerce to a half-precision float. Values beyond the binary16 range yield `None`.
    pub fn as_f16(&self) -> Option<f16> {
        match self {
            Value::Float16(num) => Some(*num),
            _ => {
                let num = self.as_f32()?;
                if num.is_finite() && num.abs() > f16::MAX.to_f32() {
                    None
                } else {
                    Some(f16::from_f32(num))
                }
            }
        }
    }

    /// Coerce to a single-precision float. Finite values beyond `f32` range yield `None`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(num) => Some(*num),
            Value::Float16(num) => Some(num.to_f32()),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<f32>()
                    .ok()
                    .or_else(|| parse_int_text(text).map(|v| v as f32))
            }
            _ => {
                let num = self.as_f64()?;
                if num.is_finite() && num.abs() > f32::MAX as f64 {
                    None
                } else {
                    Some(num as f32)
                }
            }
        }
    }

    /// Coerce to a double-precision float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(num) => Some(*num),
            Value::Float32(num) => Some(*num as f64),
            Value::Float16(num) => Some(num.to_f32() as f64),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<f64>()
                    .ok()
                    .or_else(|| parse_int_text(text).map(|v| v as f64))
            }
            Value::Duration(span) => {
                Some(span.num_seconds() as f64 + span.subsec_nanos() as f64 / 1e9)
            }
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Coerce to a character.
    pub fn as_char(&self) -> Option<char> {
        match self {
            Value::Char(ch) => Some(*ch),
            Value::String(text) => {
                let mut chars = text.chars();
                let first = chars.next()?;
                chars.next().is_none().then_some(first)
            }
            _ => self.as_u32().and_then(char::from_u32),
        }
    }

    /// Text form of any present value.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Empty => None,
            other => Some(other.to_text()),
        }
    }

    /// Coerce to raw octets. Numbers are rendered big-endian in their own width.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Empty => None,
            Value::Binary(bytes) => Some(bytes.clone()),
            Value::Boolean(flag) => Some(vec![u8::from(*flag)]),
            Value::Int8(num) => Some(num.to_be_bytes().to_vec()),
            Value::Int16(num) => Some(num.to_be_bytes().to_vec()),
            Value::Int32(num) => Some(num.to_be_bytes().to_vec()),
            Value::Int64(num) => Some(num.to_be_bytes().to_vec()),
            Value::UInt8(num) => Some(vec![*num]),
            Value::UInt16(num) => Some(num.to_be_bytes().to_vec()),
            Value::UInt32(num) => Some(num.to_be_bytes().to_vec()),
            Value::UInt64(num) => Some(num.to_be_bytes().to_vec()),
            Value::Float16(num) => Some(num.to_be_bytes().to_vec()),
            Value::Float32(num) => Some(num.to_be_bytes().to_vec()),
            Value::Float64(num) => Some(num.to_be_bytes().to_vec()),
            Value::Char(ch) => Some(ch.to_string().into_bytes()),
            Value::String(text) => {
                if text.starts_with("0x") || text.starts_with("0X") {
                    parse_hex(text)
                } else {
                    Some(text.as_bytes().to_vec())
                }
            }
            Value::IpAddress(IpAddr::V4(addr)) => Some(addr.octets().to_vec()),
            Value::IpAddress(IpAddr::V6(addr)) => Some(addr.octets().to_vec()),
            Value::Collection(items) | Value::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(item.as_bytes()?);
                }
                Some(out)
            }
            Value::DateTime(_) | Value::Date(_) | Value::Time(_) | Value::Duration(_) => None,
        }
    }

    /// Coerce to an instant. Text is read as RFC 3339 or as Unix-epoch seconds.
    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(date) => {
                let naive = date.and_hms_opt(0, 0, 0)?;
                Some(naive.and_utc().with_timezone(&utc_offset()))
            }
            Value::String(text) => {
                let text = text.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Some(dt);
                }
                // years outside 0000-9999 carry an explicit sign
                let zoned = match text.strip_suffix(['Z', 'z']) {
                    Some(rest) => format!("{rest}+00:00"),
                    None => text.to_string(),
                };
                if let Ok(dt) = DateTime::parse_from_str(&zoned, "%Y-%m-%dT%H:%M:%S%.f%:z") {
                    return Some(dt);
                }
                if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                {
                    return Some(naive.and_utc().with_timezone(&utc_offset()));
                }
                let seconds = text.parse::<f64>().ok()?;
                from_epoch_seconds(seconds)
            }
            Value::Float16(_) | Value::Float32(_) | Value::Float64(_) => {
                from_epoch_seconds(self.as_f64()?)
            }
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::UInt8(_)
            | Value::UInt16(_)
            | Value::UInt32(_)
            | Value::UInt64(_) => {
                let seconds = self.as_i64()?;
                let dt = DateTime::from_timestamp(seconds, 0)?;
                Some(dt.with_timezone(&utc_offset()))
            }
            _ => None,
        }
    }

    /// Coerce to a calendar date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            Value::DateTime(dt) => Some(dt.date_naive()),
            Value::String(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| self.as_datetime().map(|dt| dt.date_naive())),
            _ => self.as_datetime().map(|dt| dt.date_naive()),
        }
    }

    /// Coerce to a time of day.
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(time) => Some(*time),
            Value::DateTime(dt) => Some(dt.time()),
            Value::String(text) => {
                let text = text.trim();
                NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                    .ok()
                    .or_else(|| {
                        DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.time())
                    })
            }
            Value::Duration(span) => {
                let seconds = u32::try_from(span.num_seconds()).ok()?;
                if seconds >= 86_400 {
                    return None;
                }
                NaiveTime::from_num_seconds_from_midnight_opt(seconds, span.subsec_nanos() as u32)
            }
            _ => None,
        }
    }

    /// Coerce to a time span. Numbers are read as seconds.
    pub fn as_duration(&self) -> Option<TimeDelta> {
        match self {
            Value::Duration(span) => Some(*span),
            Value::String(text) => parse_duration(text.trim()),
            Value::Time(time) => {
                let nanos = time.nanosecond().min(999_999_999);
                TimeDelta::new(time.num_seconds_from_midnight() as i64, nanos)
            }
            Value::Float16(_) | Value::Float32(_) | Value::Float64(_) => {
                let seconds = self.as_f64()?;
                if !seconds.is_finite() {
                    return None;
                }
                let whole = seconds.trunc();
                if whole.abs() > i64::MAX as f64 / 1000.0 {
                    return None;
                }
                let nanos = ((seconds - whole) * 1e9).round() as i64;
                TimeDelta::try_seconds(whole as i64)?.checked_add(&TimeDelta::nanoseconds(nanos))
            }
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::UInt8(_)
            | Value::UInt16(_)
            | Value::UInt32(_)
            | Value::UInt64(_) => TimeDelta::try_seconds(self.as_i64()?),
            _ => None,
        }
    }

    /// Coerce to an IP address. Four or sixteen raw octets are accepted.
    pub fn as_ip_addr(&self) -> Option<IpAddr> {
        match self {
            Value::IpAddress(addr) => Some(*addr),
            Value::String(text) => text.trim().parse().ok(),
            Value::Binary(bytes) => match bytes.len() {
                4 => {
                    let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::V4(Ipv4Addr::from(octets)))
                }
                16 => {
                    let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::V6(Ipv6Addr::from(octets)))
                }
                _ => None,
            },
            Value::UInt32(num) => Some(IpAddr::V4(Ipv4Addr::from(*num))),
            _ => None,
        }
    }

    /// Contained items of a container value.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Collection(items) | Value::Array(items) => Some(items),
            _ => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Boolean(flag) => Some(i128::from(*flag)),
            Value::Int8(num) => Some(i128::from(*num)),
            Value::Int16(num) => Some(i128::from(*num)),
            Value::Int32(num) => Some(i128::from(*num)),
            Value::Int64(num) => Some(i128::from(*num)),
            Value::UInt8(num) => Some(i128::from(*num)),
            Value::UInt16(num) => Some(i128::from(*num)),
            Value::UInt32(num) => Some(i128::from(*num)),
            Value::UInt64(num) => Some(i128::from(*num)),
            Value::Float16(_) | Value::Float32(_) | Value::Float64(_) => {
                integral(self.as_f64()?)
            }
            Value::Char(ch) => Some(i128::from(u32::from(*ch))),
            Value::String(text) => {
                let text = text.trim();
                parse_int_text(text).or_else(|| integral(text.parse::<f64>().ok()?))
            }
            Value::Binary(bytes) if !bytes.is_empty() && bytes.len() <= 8 => {
                Some(bytes.iter().fold(0i128, |acc, b| (acc << 8) | i128::from(*b)))
            }
            Value::DateTime(dt) => Some(i128::from(dt.timestamp())),
            Value::IpAddress(IpAddr::V4(addr)) => Some(i128::from(u32::from(*addr))),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f16 => Float16,
    f32 => Float32,
    f64 => Float64,
    char => Char,
    String => String,
    Vec<u8> => Binary,
    DateTime<FixedOffset> => DateTime,
    NaiveDate => Date,
    NaiveTime => Time,
    TimeDelta => Duration,
    IpAddr => IpAddress,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn integral(num: f64) -> Option<i128> {
    if num.is_finite() && num.fract() == 0.0 && num.abs() < 1.7e38 {
        Some(num as i128)
    } else {
        None
    }
}

fn from_epoch_seconds(seconds: f64) -> Option<DateTime<FixedOffset>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole.abs() > i64::MAX as f64 {
        return None;
    }
    let dt = DateTime::from_timestamp(whole as i64, nanos)?;
    Some(dt.with_timezone(&utc_offset()))
}

/// Parse integer text, accepting an optional sign and a `0x` hexadecimal prefix.
fn parse_int_text(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => i128::from_str_radix(hex, 16).ok()?,
        Some(_) => return None,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<i128>().ok()?
        }
        None => return None,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn format_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

fn format_duration(span: &TimeDelta) -> String {
    let negative = *span < TimeDelta::zero();
    let magnitude = if negative { -*span } else { *span };
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str("PT");
    out.push_str(&magnitude.num_seconds().to_string());
    let nanos = magnitude.subsec_nanos();
    if nanos != 0 {
        let frac = format!("{nanos:09}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out.push('S');
    out
}

/// Parse an ISO-8601 duration (`[-]P[nD][T[nH][nM][n[.f]S]]`), `hh:mm:ss[.f]`,
/// or a plain number of seconds.
fn parse_duration(text: &str) -> Option<TimeDelta> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let nanos = if let Some(iso) = body.strip_prefix('P').or_else(|| body.strip_prefix('p')) {
        parse_iso_duration(iso)?
    } else if body.contains(':') {
        let parts: Vec<&str> = body.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [minutes, seconds] => ("0", *minutes, *seconds),
            [hours, minutes, seconds] => (*hours, *minutes, *seconds),
            _ => return None,
        };
        let hours: i128 = hours.parse().ok()?;
        let minutes: i128 = minutes.parse().ok()?;
        hours
            .checked_mul(3600)?
            .checked_add(minutes.checked_mul(60)?)?
            .checked_mul(1_000_000_000)?
            .checked_add(parse_decimal_nanos(seconds)?)?
    } else {
        parse_decimal_nanos(body)?
    };

    let signed = if negative { -nanos } else { nanos };
    let secs = i64::try_from(signed.div_euclid(1_000_000_000)).ok()?;
    let sub = signed.rem_euclid(1_000_000_000) as u32;
    TimeDelta::new(secs, sub)
}

fn parse_iso_duration(iso: &str) -> Option<i128> {
    const SECOND: i128 = 1_000_000_000;
    let mut total: i128 = 0;
    let mut in_time = false;
    let mut number = String::new();
    let mut seen_component = false;

    for ch in iso.chars() {
        match ch.to_ascii_uppercase() {
            'T' if !in_time && number.is_empty() => in_time = true,
            c if c.is_ascii_digit() || c == '.' => number.push(c),
            unit => {
                if number.is_empty() {
                    return None;
                }
                let scale = match (in_time, unit) {
                    (false, 'W') => 7 * 86_400 * SECOND,
                    (false, 'D') => 86_400 * SECOND,
                    (true, 'H') => 3_600 * SECOND,
                    (true, 'M') => 60 * SECOND,
                    (true, 'S') => {
                        total = total.checked_add(parse_decimal_nanos(&number)?)?;
                        number.clear();
                        seen_component = true;
                        continue;
                    }
                    _ => return None,
                };
                let units: i128 = number.parse().ok()?;
                total = total.checked_add(units.checked_mul(scale)?)?;
                number.clear();
                seen_component = true;
            }
        }
    }

    (number.is_empty() && seen_component).then_some(total)
}

fn parse_decimal_nanos(text: &str) -> Option<i128> {
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 9 {
        return None;
    }
    let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_nanos: i128 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };
    whole.checked_mul(1_000_000_000)?.checked_add(frac_nanos)
}

/// Serde adapter storing a [`TimeDelta`] as `(seconds, nanoseconds)`.
mod duration_serde {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(span: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = span.num_seconds();
        let nanos = span.subsec_nanos();
        let (secs, nanos) = if nanos < 0 {
            (secs - 1, nanos + 1_000_000_000)
        } else {
            (secs, nanos)
        };
        (secs, nanos as u32).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (secs, nanos) = <(i64, u32)>::deserialize(deserializer)?;
        TimeDelta::new(secs, nanos).ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_narrowing_with_range_checks() {
        let value = Value::Int64(300);
        assert_eq!(value.as_i16(), Some(300));
        assert_eq!(value.as_u8(), None);
        assert_eq!(Value::Int32(-1).as_u32(), None);
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_hex_prefixed_text_parses_as_integer() {
        assert_eq!(Value::from("0x1F").as_u8(), Some(31));
        assert_eq!(Value::from("-0x10").as_i32(), Some(-16));
        assert_eq!(Value::from("0x").as_i32(), None);
        assert_eq!(Value::from("12abc").as_i32(), None);
    }

    #[test]
    fn test_float_to_integer_requires_integral_value() {
        assert_eq!(Value::Float64(42.0).as_i32(), Some(42));
        assert_eq!(Value::Float64(42.5).as_i32(), None);
        assert_eq!(Value::from("7.0").as_u16(), Some(7));
    }

    #[test]
    fn test_epoch_seconds_and_rfc3339_parsing() {
        let from_epoch = Value::from("0").as_datetime().unwrap();
        assert_eq!(from_epoch.timestamp(), 0);

        let from_text = Value::from("2024-02-29T12:00:00+02:00").as_datetime().unwrap();
        assert_eq!(from_text.timestamp(), 1_709_200_800);
        assert_eq!(Value::Int64(86_400).as_date(), NaiveDate::from_ymd_opt(1970, 1, 2));
    }

    #[test]
    fn test_signed_year_datetime_parses_back() {
        let far = NaiveDate::from_ymd_opt(12_000, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc()
            .with_timezone(&utc_offset());
        let text = Value::from(far).to_text();
        assert_eq!(text, "+12000-01-01T00:00:00Z");
        assert_eq!(Value::parse_as(ValueKind::DateTime, &text), Some(Value::from(far)));

        let shifted = Value::from("-0044-03-15T12:30:00.25+01:00").as_datetime().unwrap();
        assert_eq!(shifted.offset().local_minus_utc(), 3600);
        assert_eq!(shifted.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let digits = "9".repeat(40);
        assert_eq!(Value::from(digits.as_str()).as_duration(), None);
        assert_eq!(Value::from(format!("P{digits}D")).as_duration(), None);
        assert_eq!(Value::from(format!("PT{digits}S")).as_duration(), None);
        assert_eq!(Value::from(format!("{digits}:00:00")).as_duration(), None);
        assert_eq!(Value::from(format!("00:{digits}:00")).as_duration(), None);
        // fits in i128 but not in TimeDelta
        assert_eq!(Value::from("P99999999999999999D").as_duration(), None);
    }

    #[test]
    fn test_ip_address_coercions() {
        let addr = Value::from("10.0.0.1").as_ip_addr().unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(Value::Binary(vec![10, 0, 0, 1]).as_ip_addr(), Some(addr));
        assert_eq!(Value::from("not-an-ip").as_ip_addr(), None);
    }

    #[test]
    fn test_bytes_are_big_endian() {
        assert_eq!(Value::UInt16(0x0102).as_bytes(), Some(vec![1, 2]));
        assert_eq!(Value::from("0x0a0b").as_bytes(), Some(vec![0x0a, 0x0b]));
        assert_eq!(Value::from("ab").as_bytes(), Some(b"ab".to_vec()));
        assert_eq!(Value::Binary(vec![1, 0]).as_u16(), Some(256));
    }

    #[test]
    fn test_duration_text_forms() {
        let span = TimeDelta::milliseconds(1500);
        assert_eq!(Value::Duration(span).to_text(), "PT1.5S");
        assert_eq!(parse_duration("PT1.5S"), Some(span));
        assert_eq!(parse_duration("P1DT1H"), Some(TimeDelta::hours(25)));
        assert_eq!(parse_duration("-PT2S"), Some(TimeDelta::seconds(-2)));
        assert_eq!(parse_duration("01:02:03"), Some(TimeDelta::seconds(3723)));
        assert_eq!(parse_duration("2:30"), Some(TimeDelta::seconds(150)));
        assert_eq!(parse_duration("0.25"), Some(TimeDelta::milliseconds(250)));
        assert_eq!(parse_duration("P"), None);
        assert_eq!(parse_duration("PT1X"), None);
    }

    #[test]
    fn test_half_precision_conversion() {
        assert_eq!(Value::from(1.5f32).as_f16(), Some(f16::from_f32(1.5)));
        assert_eq!(Value::from(65504.0f32).as_f16(), Some(f16::MAX));
        assert_eq!(Value::from(1e6f32).as_f16(), None);
        assert_eq!(Value::from("-2").as_f16(), Some(f16::from_f32(-2.0)));
        let tiny = Value::from(f16::from_bits(0x0001));
        assert_eq!(tiny.as_f32(), Some(2f32.powi(-24)));
        assert_eq!(tiny.as_bytes(), Some(vec![0x00, 0x01]));
        assert_eq!(Value::Float64(1e6).as_f16(), None);
    }

    #[test]
    fn test_conversion_failures_never_panic() {
        let values = [
            Value::Empty,
            Value::from("garbage"),
            Value::Binary(vec![0; 32]),
            Value::Float64(f64::NAN),
            Value::Collection(vec![Value::Empty]),
        ];
        for value in values {
            for kind in [
                ValueKind::Int8,
                ValueKind::UInt64,
                ValueKind::Float16,
                ValueKind::DateTime,
                ValueKind::Duration,
                ValueKind::IpAddress,
                ValueKind::Char,
            ] {
                let _ = value.convert(kind);
            }
        }
    }

    #[test]
    fn test_array_requires_homogeneous_items() {
        let mixed = Value::Collection(vec![Value::Int32(1), Value::from("x")]);
        assert_eq!(mixed.convert(ValueKind::Array), None);
        let same = Value::Collection(vec![Value::Int32(1), Value::Int32(2)]);
        assert!(matches!(same.convert(ValueKind::Array), Some(Value::Array(_))));
    }
}
