pub trait NormalizeString {
    /// Normalizes line endings by stripping `\r` and guarantees a trailing `\n`.
    fn normalize(&self) -> String;
}

impl NormalizeString for str {
    fn normalize(&self) -> String {
        if !self.contains('\r') {
            if self.ends_with('\n') {
                return self.to_string();
            }
            let mut out = String::with_capacity(self.len() + 1);
            out.push_str(self);
            out.push('\n');
            return out;
        }

        let mut out = String::with_capacity(self.len() + 1);
        let mut chars = self.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\r' {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            } else {
                out.push(ch);
            }
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

impl NormalizeString for String {
    fn normalize(&self) -> String {
        self.as_str().normalize()
    }
}

impl NormalizeString for &str {
    fn normalize(&self) -> String {
        (*self).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_becomes_single_newline() {
        assert_eq!("".normalize(), "\n");
    }

    #[test]
    fn already_normalized_unchanged() {
        assert_eq!("a\nb\nc\n".normalize(), "a\nb\nc\n");
    }

    #[test]
    fn adds_trailing_newline_when_missing() {
        assert_eq!("a\nb\nc".normalize(), "a\nb\nc\n");
    }

    #[test]
    fn crlf_converted_to_lf() {
        assert_eq!("a\r\nb\r\nc\r\n".normalize(), "a\nb\nc\n");
    }

    #[test]
    fn standalone_cr_converted_to_lf() {
        assert_eq!("a\rb\rc".normalize(), "a\nb\nc\n");
    }

    #[test]
    fn mixed_lf_crlf_cr() {
        assert_eq!("a\nb\r\nc\rd".normalize(), "a\nb\nc\nd\n");
    }

    #[test]
    fn consecutive_crlf_converted() {
        assert_eq!("a\r\n\r\n\r\nb".normalize(), "a\n\n\nb\n");
    }

    #[test]
    fn unicode_preserved() {
        assert_eq!("héllo\r\nwörld".normalize(), "héllo\nwörld\n");
    }
}
