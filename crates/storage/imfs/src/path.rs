//! Path tokenizer
//!
//! Both `/` and `\` separate components. Empty components are skipped, so
//! `a//b` and `a/b/` walk the same names as `a/b`.

use crate::{ImfsError, ImfsResult, NAME_MAX};

/// One step of a path walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// A directory entry name
    Name(&'a str),
    /// `..`
    UpDir,
    /// `.`
    CurrentDir,
    /// Nothing left to walk
    NoMorePath,
    /// Component longer than `NAME_MAX` or containing NUL
    Invalid,
}

/// Check if a byte separates path components
pub fn is_separator(byte: u8) -> bool {
    byte == b'/' || byte == b'\\'
}

/// Check if a path starts at the root
pub fn is_absolute(path: &str) -> bool {
    path.bytes().next().map(is_separator).unwrap_or(false)
}

/// Validate a name for a new directory entry
pub fn check_name(name: &str) -> ImfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.bytes().any(is_separator) {
        return Err(ImfsError::InvalidArgument);
    }
    if name.len() > NAME_MAX || name.bytes().any(|b| b == 0) {
        return Err(ImfsError::NameTooLong);
    }
    Ok(())
}

/// Splits a path into tokens
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    path: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(path: &'a str) -> Self {
        Tokenizer { path, pos: 0 }
    }

    /// Resume a walk at byte offset `pos`
    pub fn at(path: &'a str, pos: usize) -> Self {
        Tokenizer { path, pos }
    }

    /// Byte offset of the next token
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if only separators remain
    pub fn at_end(&self) -> bool {
        self.path.as_bytes()[self.pos..].iter().all(|&b| is_separator(b))
    }

    /// Consume and classify the next component
    pub fn next_token(&mut self) -> Token<'a> {
        let bytes = self.path.as_bytes();
        while self.pos < bytes.len() && is_separator(bytes[self.pos]) {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Token::NoMorePath;
        }

        let start = self.pos;
        while self.pos < bytes.len() && !is_separator(bytes[self.pos]) {
            self.pos += 1;
        }
        let component = &self.path[start..self.pos];

        if component.len() > NAME_MAX || component.bytes().any(|b| b == 0) {
            return Token::Invalid;
        }
        match component {
            "." => Token::CurrentDir,
            ".." => Token::UpDir,
            name => Token::Name(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    fn tokens(path: &str) -> Vec<Token<'_>> {
        let mut tokenizer = Tokenizer::new(path);
        let mut out = Vec::new();
        loop {
            let token = tokenizer.next_token();
            out.push(token);
            if matches!(token, Token::NoMorePath | Token::Invalid) {
                return out;
            }
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokens("/a/./b/../c"),
            [
                Token::Name("a"),
                Token::CurrentDir,
                Token::Name("b"),
                Token::UpDir,
                Token::Name("c"),
                Token::NoMorePath
            ]
        );
        assert_eq!(tokens("a\\b//c/"), [Token::Name("a"), Token::Name("b"), Token::Name("c"), Token::NoMorePath]);
        assert_eq!(tokens(""), [Token::NoMorePath]);
        assert_eq!(tokens("///"), [Token::NoMorePath]);
    }

    #[test]
    fn test_invalid_components() {
        let long: String = core::iter::repeat('x').take(NAME_MAX + 1).collect();
        assert_eq!(tokens(&long), [Token::Invalid]);
        assert_eq!(tokens("a/b\0c"), [Token::Name("a"), Token::Invalid]);

        let max: String = core::iter::repeat('x').take(NAME_MAX).collect();
        assert_eq!(tokens(&max), [Token::Name(&max), Token::NoMorePath]);
    }

    #[test]
    fn test_at_end() {
        let mut tokenizer = Tokenizer::new("a/b//");
        tokenizer.next_token();
        assert!(!tokenizer.at_end());
        tokenizer.next_token();
        assert!(tokenizer.at_end());
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("file.txt").is_ok());
        assert_eq!(check_name(""), Err(ImfsError::InvalidArgument));
        assert_eq!(check_name(".."), Err(ImfsError::InvalidArgument));
        assert_eq!(check_name("a/b"), Err(ImfsError::InvalidArgument));
        let long: String = core::iter::repeat('n').take(NAME_MAX + 1).collect();
        assert_eq!(check_name(&long), Err(ImfsError::NameTooLong));
        assert!(is_absolute("\\x"));
        assert!(!is_absolute("x/"));
    }
}
