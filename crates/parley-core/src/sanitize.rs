//! Escaping of user-supplied text before it enters history or storage.

/// Escape HTML-significant characters and strip control characters.
///
/// Newlines and tabs are kept. The result is safe to render in the chat UI
/// without further escaping.
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(clean_text("What are your plans?"), "What are your plans?");
    }

    #[test]
    fn test_markup_is_escaped() {
        assert_eq!(
            clean_text("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
        assert_eq!(clean_text("a & b \"c\""), "a &amp; b &quot;c&quot;");
    }

    #[test]
    fn test_control_characters_removed() {
        assert_eq!(clean_text("line\u{0}one\nline\ttwo\r"), "lineone\nline\ttwo");
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(clean_text("shukriya 🙏 سلام"), "shukriya 🙏 سلام");
    }
}
