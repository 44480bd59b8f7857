//! # Property Codec
//!
//! Pure conversions between register words, typed values and the wire-format
//! strings used by upstream writers. One dispatch on [`SemanticType`] drives
//! every conversion.
//!
//! ## Raw Layout
//!
//! | Type | Registers | Raw form |
//! |------|-----------|----------|
//! | Float64 | 1, 2, 4 | signed integer × scale |
//! | UInt32/Int32 | 2 | integer |
//! | UInt16/Int16 | 1 | integer |
//! | Duration | 1, 2 | unsigned count of seconds or minutes |
//! | Timestamp | 2, 4 | unsigned seconds since the descriptor's epoch |
//! | EnumOrdinal | 1, 2 | unsigned ordinal |
//! | FixedString | n | 2 bytes per register, NUL padded |

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::bytes::{
    bytes_to_words, sign_extend, signed_range, u64_to_words, unsigned_max, words_to_bytes,
    words_to_u64,
};
use crate::error::{RegMapError, RegMapResult, TransportError};
use crate::schema::{PropertyDescriptor, SemanticType};
use crate::value::PropertyValue;

// ============================================================================
// Decoding
// ============================================================================

/// Decode a descriptor's registers into a typed value.
///
/// `words` must hold exactly `desc.length` registers.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{decode, PropertyDescriptor, PropertyValue, Scale, SemanticType};
///
/// let temp = PropertyDescriptor::new("Temperature", SemanticType::Float64, 100)
///     .with_length(2)
///     .with_scale(Scale::per(10).unwrap());
///
/// assert_eq!(decode(&temp, &[0, 215]).unwrap(), PropertyValue::Float(21.5));
/// ```
pub fn decode(desc: &PropertyDescriptor, words: &[u16]) -> RegMapResult<PropertyValue> {
    if words.len() != usize::from(desc.length) {
        return Err(TransportError::protocol(format!(
            "'{}' expects {} registers, got {}",
            desc.name,
            desc.length,
            words.len()
        ))
        .into());
    }

    if desc.semantic_type == SemanticType::FixedString {
        return decode_text(desc, words);
    }

    // numeric types span at most 4 registers
    let raw = words_to_u64(words, desc.word_order);
    let bits = 16 * u32::from(desc.length);

    let value = match desc.semantic_type {
        SemanticType::Float64 => PropertyValue::Float(desc.scale.apply(sign_extend(raw, bits))),
        SemanticType::UInt32 => PropertyValue::UInt32(raw as u32),
        SemanticType::Int32 => PropertyValue::Int32(raw as u32 as i32),
        SemanticType::UInt16 => PropertyValue::UInt16(raw as u16),
        SemanticType::Int16 => PropertyValue::Int16(raw as u16 as i16),
        SemanticType::Duration => {
            let secs = raw.checked_mul(desc.time_unit.seconds()).ok_or_else(|| {
                RegMapError::encoding(format!("'{}': duration {} overflows", desc.name, raw))
            })?;
            PropertyValue::Duration(Duration::from_secs(secs))
        }
        SemanticType::Timestamp => PropertyValue::Timestamp(timestamp_from_raw(desc, raw)?),
        // unknown ordinals are kept as-is
        SemanticType::EnumOrdinal => PropertyValue::Enum(raw as u32),
        SemanticType::FixedString => return decode_text(desc, words),
    };
    Ok(value)
}

fn decode_text(desc: &PropertyDescriptor, words: &[u16]) -> RegMapResult<PropertyValue> {
    let bytes = words_to_bytes(words);
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&bytes[..end]).map_err(|e| {
        RegMapError::encoding(format!("'{}': invalid UTF-8 text: {}", desc.name, e))
    })?;
    Ok(PropertyValue::Text(text.to_string()))
}

fn timestamp_from_raw(desc: &PropertyDescriptor, raw: u64) -> RegMapResult<DateTime<Utc>> {
    i64::try_from(raw)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| desc.epoch.checked_add_signed(delta))
        .ok_or_else(|| {
            RegMapError::encoding(format!(
                "'{}': timestamp offset {}s is out of range",
                desc.name, raw
            ))
        })
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a typed value into exactly `desc.length` registers.
///
/// Fails with an encoding error when the value's type does not match the
/// descriptor or the scaled value does not fit the register width.
pub fn encode(desc: &PropertyDescriptor, value: &PropertyValue) -> RegMapResult<Vec<u16>> {
    let len = usize::from(desc.length);
    let mismatch = || {
        RegMapError::encoding(format!(
            "'{}' expects a {} value, got {}",
            desc.name,
            desc.semantic_type,
            value.type_name()
        ))
    };
    if value.semantic_type() != desc.semantic_type {
        return Err(mismatch());
    }

    let raw: u64 = match value {
        PropertyValue::Float(v) => {
            let raw = desc.scale.unapply(*v)?;
            let (min, max) = signed_range(len);
            if raw < min || raw > max {
                return Err(RegMapError::encoding(format!(
                    "'{}': {} does not fit {} registers at scale {}",
                    desc.name, v, len, desc.scale
                )));
            }
            raw as u64
        }
        PropertyValue::UInt32(v) => u64::from(*v),
        PropertyValue::Int32(v) => u64::from(*v as u32),
        PropertyValue::UInt16(v) => u64::from(*v),
        PropertyValue::Int16(v) => u64::from(*v as u16),
        PropertyValue::Duration(d) => {
            let unit = desc.time_unit.seconds();
            if d.subsec_nanos() != 0 || d.as_secs() % unit != 0 {
                return Err(RegMapError::encoding(format!(
                    "'{}': {:?} is not a whole number of {:?}",
                    desc.name, d, desc.time_unit
                )));
            }
            checked_unsigned(desc, d.as_secs() / unit)?
        }
        PropertyValue::Timestamp(t) => {
            let delta = t.signed_duration_since(desc.epoch);
            if delta < TimeDelta::zero() {
                return Err(RegMapError::encoding(format!(
                    "'{}': {} precedes the device epoch {}",
                    desc.name, t, desc.epoch
                )));
            }
            if t.timestamp_subsec_nanos() != desc.epoch.timestamp_subsec_nanos() {
                return Err(RegMapError::encoding(format!(
                    "'{}': {} is not a whole number of seconds",
                    desc.name, t
                )));
            }
            checked_unsigned(desc, delta.num_seconds() as u64)?
        }
        PropertyValue::Enum(v) => checked_unsigned(desc, u64::from(*v))?,
        PropertyValue::Text(s) => {
            return bytes_to_words(s.as_bytes(), len).ok_or_else(|| {
                RegMapError::encoding(format!(
                    "'{}': text of {} bytes exceeds {} registers",
                    desc.name,
                    s.len(),
                    len
                ))
            });
        }
    };

    Ok(u64_to_words(raw, len, desc.word_order))
}

fn checked_unsigned(desc: &PropertyDescriptor, raw: u64) -> RegMapResult<u64> {
    if raw > unsigned_max(usize::from(desc.length)) {
        return Err(RegMapError::encoding(format!(
            "'{}': raw value {} does not fit {} registers",
            desc.name, raw, desc.length
        )));
    }
    Ok(raw)
}

// ============================================================================
// Wire Format
// ============================================================================

/// Parse an upstream wire-format string into the descriptor's value type.
///
/// | Type | Accepted forms |
/// |------|----------------|
/// | Float64 | decimal number |
/// | integers | decimal integer in range |
/// | Duration | `H:MM`, `H:MM:SS`, or a bare count in the descriptor's unit |
/// | Timestamp | RFC 3339, or bare Unix seconds |
/// | EnumOrdinal | ordinal, or a declared label (case-insensitive) |
/// | FixedString | the text itself |
pub fn parse_wire(desc: &PropertyDescriptor, raw: &str) -> RegMapResult<PropertyValue> {
    let text = raw.trim();
    let invalid = || {
        RegMapError::encoding(format!(
            "'{}': cannot parse '{}' as {}",
            desc.name, raw, desc.semantic_type
        ))
    };

    let value = match desc.semantic_type {
        SemanticType::Float64 => {
            let v: f64 = text.parse().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            PropertyValue::Float(v)
        }
        SemanticType::UInt32 => PropertyValue::UInt32(parse_integer(desc, text, invalid)?),
        SemanticType::Int32 => PropertyValue::Int32(parse_integer(desc, text, invalid)?),
        SemanticType::UInt16 => PropertyValue::UInt16(parse_integer(desc, text, invalid)?),
        SemanticType::Int16 => PropertyValue::Int16(parse_integer(desc, text, invalid)?),
        SemanticType::Duration => {
            let secs = if text.contains(':') {
                parse_clock(text).ok_or_else(invalid)?
            } else {
                text.parse::<u64>()
                    .ok()
                    .and_then(|count| count.checked_mul(desc.time_unit.seconds()))
                    .ok_or_else(invalid)?
            };
            PropertyValue::Duration(Duration::from_secs(secs))
        }
        SemanticType::Timestamp => {
            let ts = match DateTime::parse_from_rfc3339(text) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => text
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .ok_or_else(invalid)?,
            };
            PropertyValue::Timestamp(ts)
        }
        SemanticType::EnumOrdinal => match text.parse::<u32>() {
            Ok(ordinal) => PropertyValue::Enum(ordinal),
            Err(_) => PropertyValue::Enum(desc.variant_ordinal(text).ok_or_else(invalid)?),
        },
        SemanticType::FixedString => PropertyValue::Text(raw.to_string()),
    };
    Ok(value)
}

/// Decimal integer narrowed to the property's type.
///
/// Text that is not an integer is an encoding error; a well-formed integer
/// outside the type's range is `OutOfRange`.
fn parse_integer<T>(
    desc: &PropertyDescriptor,
    text: &str,
    invalid: impl Fn() -> RegMapError,
) -> RegMapResult<T>
where
    T: TryFrom<i128>,
{
    let wide: i128 = text.parse().map_err(|_| invalid())?;
    T::try_from(wide).map_err(|_| {
        RegMapError::out_of_range(format!(
            "'{}': {} is outside the range of {}",
            desc.name, wide, desc.semantic_type
        ))
    })
}

/// `H:MM` or `H:MM:SS` to seconds.
fn parse_clock(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.split(':').collect();
    let field = |s: &str| s.trim().parse::<u64>().ok();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m] => (field(h)?, field(m)?, 0),
        [h, m, s] => (field(h)?, field(m)?, field(s)?),
        _ => return None,
    };
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

/// Render a value in the wire format accepted by [`parse_wire`].
///
/// Enum ordinals with a declared label render as the label.
pub fn format_wire(desc: &PropertyDescriptor, value: &PropertyValue) -> String {
    match value {
        PropertyValue::Enum(ordinal) => desc
            .variant_label(*ordinal)
            .map_or_else(|| ordinal.to_string(), str::to_string),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::WordOrder;
    use crate::scale::Scale;
    use crate::schema::TimeUnit;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn temperature() -> PropertyDescriptor {
        PropertyDescriptor::new("Temperature", SemanticType::Float64, 100)
            .with_length(2)
            .with_scale(Scale::per(10).unwrap())
    }

    fn desc(ty: SemanticType) -> PropertyDescriptor {
        PropertyDescriptor::new("X", ty, 0)
    }

    #[test]
    fn test_decode_scaled_temperature() {
        assert_eq!(
            decode(&temperature(), &[0x0000, 0x00D7]).unwrap(),
            PropertyValue::Float(21.5)
        );
        // negative raw values are two's complement
        assert_eq!(
            decode(&temperature(), &[0xFFFF, 0xFFF1]).unwrap(),
            PropertyValue::Float(-1.5)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_word_count() {
        let err = decode(&temperature(), &[0x00D7]).unwrap_err();
        assert!(matches!(
            err,
            RegMapError::Transport(TransportError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(
            decode(&desc(SemanticType::Int16), &[0xFFFE]).unwrap(),
            PropertyValue::Int16(-2)
        );
        assert_eq!(
            decode(&desc(SemanticType::UInt32), &[0x0001, 0x0000]).unwrap(),
            PropertyValue::UInt32(65536)
        );
        let swapped = desc(SemanticType::Int32).with_word_order(WordOrder::LowFirst);
        assert_eq!(
            decode(&swapped, &[0xFF38, 0xFFFF]).unwrap(),
            PropertyValue::Int32(-200)
        );
    }

    #[test]
    fn test_decode_duration_units() {
        let minutes = desc(SemanticType::Duration).with_time_unit(TimeUnit::Minutes);
        assert_eq!(
            decode(&minutes, &[90]).unwrap(),
            PropertyValue::Duration(Duration::from_secs(5400))
        );
        assert_eq!(
            decode(&desc(SemanticType::Duration), &[90]).unwrap(),
            PropertyValue::Duration(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_decode_timestamp_relative_to_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let ts = desc(SemanticType::Timestamp).with_epoch(epoch);
        assert_eq!(
            decode(&ts, &[0x0000, 0x0E10]).unwrap(),
            PropertyValue::Timestamp(Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_decode_enum_keeps_unknown_ordinal() {
        let mode = desc(SemanticType::EnumOrdinal).with_variants(["Off", "On"]);
        assert_eq!(decode(&mode, &[7]).unwrap(), PropertyValue::Enum(7));
        assert_eq!(format_wire(&mode, &PropertyValue::Enum(1)), "On");
        assert_eq!(format_wire(&mode, &PropertyValue::Enum(7)), "7");
    }

    #[test]
    fn test_text_trims_trailing_nul() {
        let serial = desc(SemanticType::FixedString).with_length(4);
        let words = encode(&serial, &PropertyValue::from("ETA-1")).unwrap();
        assert_eq!(words, vec![0x4554, 0x412D, 0x3100, 0x0000]);
        assert_eq!(decode(&serial, &words).unwrap(), PropertyValue::from("ETA-1"));
        assert!(encode(&serial, &PropertyValue::from("TOO LONG TEXT")).is_err());
    }

    #[test]
    fn test_encode_type_mismatch() {
        let err = encode(&temperature(), &PropertyValue::UInt16(1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EncodingError);
    }

    #[test]
    fn test_encode_overflow_after_scaling() {
        let one_word = temperature().with_length(1);
        // 3276.7 is the largest value a signed register holds at scale 1/10
        assert_eq!(
            encode(&one_word, &PropertyValue::Float(3276.7)).unwrap(),
            vec![0x7FFF]
        );
        assert!(encode(&one_word, &PropertyValue::Float(3276.8)).is_err());
        assert!(encode(&one_word, &PropertyValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_encode_duration_must_be_whole_units() {
        let minutes = desc(SemanticType::Duration).with_time_unit(TimeUnit::Minutes);
        assert_eq!(
            encode(&minutes, &PropertyValue::Duration(Duration::from_secs(120))).unwrap(),
            vec![2]
        );
        assert!(encode(&minutes, &PropertyValue::Duration(Duration::from_secs(90))).is_err());
    }

    #[test]
    fn test_encode_timestamp_before_epoch_fails() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let ts = desc(SemanticType::Timestamp).with_epoch(epoch);
        let early = Utc.with_ymd_and_hms(1999, 12, 31, 0, 0, 0).unwrap();
        assert!(encode(&ts, &PropertyValue::Timestamp(early)).is_err());
    }

    #[test]
    fn test_encode_timestamp_rejects_fractional_seconds() {
        let ts = desc(SemanticType::Timestamp);
        let parsed = parse_wire(&ts, "2024-06-01T08:00:00.999Z").unwrap();
        let err = encode(&ts, &parsed).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EncodingError);

        let whole = parse_wire(&ts, "2024-06-01T08:00:00Z").unwrap();
        assert_eq!(encode(&ts, &whole).unwrap(), vec![0x665A, 0xD500]);
    }

    #[test]
    fn test_parse_wire() {
        assert_eq!(
            parse_wire(&temperature(), " 21.5 ").unwrap(),
            PropertyValue::Float(21.5)
        );
        assert_eq!(
            parse_wire(&temperature(), "abc").unwrap_err().kind(),
            crate::error::ErrorKind::EncodingError
        );
        assert_eq!(
            parse_wire(&desc(SemanticType::UInt16), "70000").unwrap_err().kind(),
            crate::error::ErrorKind::OutOfRange
        );
        assert_eq!(
            parse_wire(&desc(SemanticType::UInt16), "-1").unwrap_err().kind(),
            crate::error::ErrorKind::OutOfRange
        );
        assert_eq!(
            parse_wire(&desc(SemanticType::Int16), "-32768").unwrap(),
            PropertyValue::Int16(i16::MIN)
        );
        assert_eq!(
            parse_wire(&desc(SemanticType::Int32), "1.5").unwrap_err().kind(),
            crate::error::ErrorKind::EncodingError
        );

        let duration = desc(SemanticType::Duration);
        assert_eq!(
            parse_wire(&duration, "1:30").unwrap(),
            PropertyValue::Duration(Duration::from_secs(5400))
        );
        assert_eq!(
            parse_wire(&duration, "0:00:45").unwrap(),
            PropertyValue::Duration(Duration::from_secs(45))
        );
        assert!(parse_wire(&duration, "1:75").is_err());

        let minutes = duration.clone().with_time_unit(TimeUnit::Minutes);
        assert_eq!(
            parse_wire(&minutes, "15").unwrap(),
            PropertyValue::Duration(Duration::from_secs(900))
        );

        let ts = desc(SemanticType::Timestamp);
        let expected = PropertyValue::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        assert_eq!(parse_wire(&ts, "2024-05-01T14:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_wire(&ts, "1714564800").unwrap(), expected);

        let mode = desc(SemanticType::EnumOrdinal).with_variants(["Off", "Heating"]);
        assert_eq!(parse_wire(&mode, "heating").unwrap(), PropertyValue::Enum(1));
        assert_eq!(parse_wire(&mode, "5").unwrap(), PropertyValue::Enum(5));
        assert!(parse_wire(&mode, "turbo").is_err());
    }

    #[test]
    fn test_format_wire_roundtrip_duration() {
        let duration = desc(SemanticType::Duration).with_length(2);
        let value = PropertyValue::Duration(Duration::from_secs(100 * 3600 + 61));
        let wire = format_wire(&duration, &value);
        assert_eq!(wire, "100:01:01");
        assert_eq!(parse_wire(&duration, &wire).unwrap(), value);
    }

    proptest! {
        #[test]
        fn prop_float_roundtrip(raw in -(1i64 << 31)..(1i64 << 31), num in 1i64..100, den in 1i64..1000) {
            let scale = Scale::new(num, den).unwrap();
            let d = temperature().with_scale(scale);
            let value = PropertyValue::Float(scale.apply(raw));
            let words = encode(&d, &value).unwrap();
            prop_assert_eq!(words.len(), 2);
            prop_assert_eq!(decode(&d, &words).unwrap(), value);
        }

        #[test]
        fn prop_float64_four_words(raw in any::<i64>()) {
            let d = desc(SemanticType::Float64);
            // f64 is exact up to 2^53
            let raw = raw >> 11;
            let value = PropertyValue::Float(raw as f64);
            prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
        }

        #[test]
        fn prop_integer_roundtrip(a in any::<u32>(), b in any::<i32>(), c in any::<u16>(), e in any::<i16>(), swap in any::<bool>()) {
            let order = if swap { WordOrder::LowFirst } else { WordOrder::HighFirst };
            let cases = [
                (SemanticType::UInt32, PropertyValue::UInt32(a)),
                (SemanticType::Int32, PropertyValue::Int32(b)),
                (SemanticType::UInt16, PropertyValue::UInt16(c)),
                (SemanticType::Int16, PropertyValue::Int16(e)),
            ];
            for (ty, value) in cases {
                let d = desc(ty).with_word_order(order);
                prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
            }
        }

        #[test]
        fn prop_duration_roundtrip(count in 0u64..=0xFFFF_FFFF, minutes in any::<bool>()) {
            let unit = if minutes { TimeUnit::Minutes } else { TimeUnit::Seconds };
            let d = desc(SemanticType::Duration).with_length(2).with_time_unit(unit);
            let value = PropertyValue::Duration(Duration::from_secs(count * unit.seconds()));
            prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
        }

        #[test]
        fn prop_timestamp_roundtrip(secs in 0i64..=0xFFFF_FFFF) {
            let d = desc(SemanticType::Timestamp);
            let value = PropertyValue::Timestamp(DateTime::from_timestamp(secs, 0).unwrap());
            prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
        }

        #[test]
        fn prop_enum_roundtrip(ordinal in 0u32..=0xFFFF) {
            let d = desc(SemanticType::EnumOrdinal);
            let value = PropertyValue::Enum(ordinal);
            prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
        }

        #[test]
        fn prop_text_roundtrip(text in "[A-Za-z0-9 ._-]{0,16}") {
            let d = desc(SemanticType::FixedString).with_length(8);
            let value = PropertyValue::Text(text);
            prop_assert_eq!(decode(&d, &encode(&d, &value).unwrap()).unwrap(), value);
        }
    }
}
