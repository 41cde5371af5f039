// Shell-style tokenizer for operator commands
//
// Tokens are separated by whitespace. A quoted section keeps its spaces and
// its quote characters; handlers unquote where they need plain text.

/// Pull-based lexer over one command line
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Next token, or `None` at end of input
    pub fn next_token(&mut self) -> Option<&'a str> {
        let rest = &self.input[self.pos..];
        let start = self.pos + (rest.len() - rest.trim_start().len());
        if start >= self.input.len() {
            self.pos = self.input.len();
            return None;
        }

        let mut quote: Option<char> = None;
        let mut end = self.input.len();
        for (offset, c) in self.input[start..].char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if c.is_whitespace() => {
                    end = start + offset;
                    break;
                }
                None => {}
            }
        }

        self.pos = end;
        Some(&self.input[start..end])
    }

    /// Unconsumed input, without surrounding whitespace
    pub fn rest(&self) -> &'a str {
        self.input[self.pos..].trim()
    }

    /// Remaining tokens, consuming the lexer
    pub fn remaining(&mut self) -> Vec<&'a str> {
        self.by_ref().collect()
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Strip one pair of matching outer quotes
pub fn unquote(token: &str) -> &str {
    for q in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(q) && token.ends_with(q) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_whitespace() {
        let tokens: Vec<&str> = Lexer::new("  w  -10\t20 ").collect();
        assert_eq!(tokens, vec!["w", "-10", "20"]);
    }

    #[test]
    fn test_quoted_section_is_one_token() {
        let mut lexer = Lexer::new(r#"talk "hello friend!" now"#);
        assert_eq!(lexer.next_token(), Some("talk"));
        assert_eq!(lexer.next_token(), Some(r#""hello friend!""#));
        assert_eq!(lexer.next_token(), Some("now"));
        assert_eq!(lexer.next_token(), None);
        assert_eq!(lexer.next_token(), None);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        let tokens: Vec<&str> = Lexer::new("say 'it is late").collect();
        assert_eq!(tokens, vec!["say", "'it is late"]);
    }

    #[test]
    fn test_rest_after_pull() {
        let mut lexer = Lexer::new("go  forward fast ");
        assert_eq!(lexer.next_token(), Some("go"));
        assert_eq!(lexer.rest(), "forward fast");
        assert_eq!(lexer.remaining(), vec!["forward", "fast"]);
        assert_eq!(lexer.rest(), "");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(Lexer::new("").next_token(), None);
        assert_eq!(Lexer::new("   ").next_token(), None);
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""hi there""#), "hi there");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote(r#""mixed'"#), r#""mixed'"#);
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote("plain"), "plain");
    }
}
