use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Mint a fresh tool-call id of the form `call_<32 lowercase hex>`.
#[inline]
pub(crate) fn new_call_id() -> String {
    let id = uuid::Uuid::from_u128(fastrand::u128(..));
    let mut out = String::with_capacity(37);
    out.push_str("call_");
    out.push_str(id.simple().encode_lower(&mut uuid::Uuid::encode_buffer()));
    out
}

/// Fallback completion id when the preparation step does not supply one.
pub(crate) fn fallback_completion_id() -> String {
    let mut out = String::with_capacity(32);
    out.push_str("chatcmpl-");
    push_u64_decimal(&mut out, unix_now_secs());
    out.push_str(&format!("{:04x}", fastrand::u16(..)));
    out
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
pub(crate) fn push_usize_decimal(out: &mut String, n: usize) {
    push_u64_decimal(out, n as u64);
}

#[cfg(test)]
mod tests {
    use super::{new_call_id, push_json_string_escaped, push_u64_decimal};

    #[test]
    fn call_ids_are_prefixed_hex() {
        let id = new_call_id();
        assert_eq!(id.len(), 37);
        assert!(id.starts_with("call_"));
        assert!(id[5..].bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(id, new_call_id());
    }

    #[test]
    fn push_u64_decimal_formats_digits() {
        let mut out = String::new();
        push_u64_decimal(&mut out, 0);
        out.push(',');
        push_u64_decimal(&mut out, 1_700_000_000);
        assert_eq!(out, "0,1700000000");
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji 😀 café",
            "mix \"😀\\\n\t\r\u{0000}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }
}
