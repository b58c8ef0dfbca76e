//! Settings payload encoding/decoding
//!
//! Payload format (after the exchange marker):
//! `[On:<n>][Off:<n>][Pro:<n>][PLen:<n>][PReps:<n>][TOBQ:<0|1>][VLen:<n>][]`
//!
//! The empty bracket pair terminates the field list. Responses from the module
//! use the same `[key:value]` fields in any order and may omit any of them.

use std::fmt::Write;

use super::ExchangeKind;
use crate::outlet::OutletProfile;

/// Encode a full PUSH-SETTINGS request, marker included
pub fn encode_settings(profile: &OutletProfile) -> String {
    let mut out = String::with_capacity(super::MAX_RESPONSE_SIZE);
    out.push_str(ExchangeKind::PushSettings.request());
    // Writing to a String cannot fail
    let _ = write!(
        out,
        "[On:{}][Off:{}][Pro:{}][PLen:{}][PReps:{}][TOBQ:{}][VLen:{}][]",
        profile.on_code,
        profile.off_code,
        profile.protocol,
        profile.pulse_length,
        profile.pulse_repeats,
        u8::from(profile.restore_on_shutdown),
        profile.value_length,
    );
    out
}

/// Split `[key:value]` fields out of a payload.
///
/// Parsing stops at the empty `[]` terminator or at the end of the text.
/// Fragments without a colon are skipped.
pub fn parse_fields(payload: &str) -> Vec<(&str, &str)> {
    let mut fields = Vec::new();
    for chunk in payload.split('[').skip(1) {
        let body = match chunk.find(']') {
            Some(end) => &chunk[..end],
            None => chunk,
        };
        if body.is_empty() {
            break;
        }
        if let Some((key, value)) = body.split_once(':') {
            fields.push((key.trim(), value.trim()));
        }
    }
    fields
}

/// Strip a known marker (request or response) from the start of `text`
pub fn strip_marker(text: &str) -> &str {
    for kind in ExchangeKind::ALL {
        for marker in [kind.response(), kind.request()] {
            if let Some(rest) = text.strip_prefix(marker) {
                return rest;
            }
        }
    }
    text
}

/// Apply every recognised field of `payload` on top of `base`
pub fn apply_settings(base: OutletProfile, payload: &str) -> OutletProfile {
    let mut profile = base;
    for (key, value) in parse_fields(strip_marker(payload)) {
        match value.parse::<u32>() {
            Ok(number) => {
                if !profile.apply_field(key, number) {
                    tracing::debug!("ignoring unknown outlet field {:?}", key);
                }
            }
            Err(_) => {
                tracing::warn!("ignoring outlet field {}:{:?} (not a number)", key, value);
            }
        }
    }
    profile
}

/// Decode a settings payload into a fresh profile
pub fn decode_settings(payload: &str) -> OutletProfile {
    apply_settings(OutletProfile::default(), payload)
}

/// Extract the `Build` field of a VERSION response
pub fn parse_build(payload: &str) -> Option<String> {
    parse_fields(strip_marker(payload))
        .into_iter()
        .find(|(key, _)| *key == "Build")
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_profile() -> OutletProfile {
        OutletProfile {
            on_code: 4_478_259,
            off_code: 4_478_268,
            protocol: 1,
            pulse_length: 185,
            pulse_repeats: 6,
            restore_on_shutdown: true,
            value_length: 24,
        }
    }

    #[test]
    fn test_encode_field_order() {
        let text = encode_settings(&sample_profile());
        assert_eq!(
            text,
            "<CO_SETTINGS>[On:4478259][Off:4478268][Pro:1][PLen:185][PReps:6][TOBQ:1][VLen:24][]"
        );
    }

    #[test]
    fn test_round_trip() {
        for profile in [
            sample_profile(),
            OutletProfile::default(),
            OutletProfile {
                on_code: u32::MAX,
                off_code: u32::MAX - 1,
                protocol: 9,
                pulse_length: 999,
                pulse_repeats: 9,
                restore_on_shutdown: false,
                value_length: 32,
            },
        ] {
            assert_eq!(decode_settings(&encode_settings(&profile)), profile);
        }
    }

    #[test]
    fn test_decode_any_order() {
        let profile =
            decode_settings("<CO_EEPROM_OK>[VLen:24][PLen:350][On:21][TOBQ:0][Off:20][Pro:2][PReps:3][]");
        assert_eq!(profile.on_code, 21);
        assert_eq!(profile.off_code, 20);
        assert_eq!(profile.protocol, 2);
        assert_eq!(profile.pulse_length, 350);
        assert_eq!(profile.pulse_repeats, 3);
        assert_eq!(profile.value_length, 24);
    }

    #[test]
    fn test_learn_response_keeps_absent_fields() {
        let base = OutletProfile {
            pulse_repeats: 7,
            restore_on_shutdown: true,
            ..sample_profile()
        };
        let learned = apply_settings(base, "<CO_LEARN_OK>[Code:5393][Pro:1][PLen:320][VLen:24][]");
        assert_eq!(learned.on_code, 5393);
        assert_eq!(learned.off_code, 5393);
        assert_eq!(learned.pulse_length, 320);
        assert_eq!(learned.pulse_repeats, 7);
        assert!(learned.restore_on_shutdown);
    }

    #[test]
    fn test_parse_stops_at_terminator() {
        let fields = parse_fields("[A:1][B:2][][C:3]");
        assert_eq!(fields, vec![("A", "1"), ("B", "2")]);
    }

    #[test]
    fn test_parse_tolerates_truncation() {
        // A response cut short by the buffer size still yields complete fields
        let fields = parse_fields("[On:12][Off:1");
        assert_eq!(fields, vec![("On", "12"), ("Off", "1")]);
    }

    #[test]
    fn test_bad_number_is_skipped() {
        let profile = decode_settings("[On:abc][Off:9][]");
        assert_eq!(profile.on_code, 0);
        assert_eq!(profile.off_code, 9);
    }

    #[test]
    fn test_parse_build() {
        assert_eq!(
            parse_build("<CO_VERSION_OK>[Build:0.8.07][]"),
            Some("0.8.07".to_string())
        );
        assert_eq!(parse_build("<CO_VERSION_OK>[]"), None);
    }
}
