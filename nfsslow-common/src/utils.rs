use std::borrow::Cow;

/// Text up to the first NUL (or the whole buffer when there is none).
pub fn str_from_buf_nul(src: &[u8]) -> Cow<'_, str> {
    let end = src.iter().position(|&c| c == b'\0').unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end])
}

#[cfg(test)]
mod tests {
    use super::str_from_buf_nul;

    #[test]
    fn nul_padded_text() {
        assert_eq!(str_from_buf_nul(b"cat\0\0\0garbage"), "cat");
        assert_eq!(str_from_buf_nul(b"\0abc"), "");
    }

    #[test]
    fn unterminated_text_uses_whole_buffer() {
        assert_eq!(str_from_buf_nul(b"target.log"), "target.log");
        assert_eq!(str_from_buf_nul(b""), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(str_from_buf_nul(&[b'a', 0xff, b'b', 0]), "a\u{fffd}b");
    }
}
