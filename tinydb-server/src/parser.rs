//! # Command Parser
//!
//! Purpose: consumes one lexed line into a command name plus a typed
//! argument vector. The first token must be a recognized command; empty
//! or ill-formed lines parse to `None`, and the executor answers
//! `Invalid command\n` for those.

use crate::lexer::{tokenize, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    String(String),
    Number(i64),
}

impl Arg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s),
            Arg::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Arg::Number(n) => Some(*n),
            Arg::String(_) => None,
        }
    }

    /// Renders the argument the way it would appear as a stored value:
    /// numbers stay bare, strings stay bare too (only list rendering
    /// quotes strings).
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Arg::String(s) => s.as_bytes().to_vec(),
            Arg::Number(n) => n.to_string().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub name: String,
    pub argv: Vec<Arg>,
}

impl ParsedCommand {
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.argv.get(index)
    }
}

pub fn parse_line(line: &str) -> Option<ParsedCommand> {
    let tokens = tokenize(line);
    let mut iter = tokens.into_iter();

    let name = match iter.next()? {
        Token::Command(name) => name,
        _ => return None,
    };

    let argv = iter
        .map(|token| match token {
            Token::Number(n) => Arg::Number(n),
            Token::String(s) => Arg::String(s),
            Token::Identifier(s) => Arg::String(s),
            Token::Command(s) => Arg::String(s),
        })
        .collect();

    Some(ParsedCommand { name, argv })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_two_args() {
        let cmd = parse_line("set x hello").unwrap();
        assert_eq!(cmd.name, "set");
        assert_eq!(cmd.argv, vec![Arg::String("x".to_string()), Arg::String("hello".to_string())]);
    }

    #[test]
    fn parses_numeric_argument() {
        let cmd = parse_line("expire k 30").unwrap();
        assert_eq!(cmd.argv[1], Arg::Number(30));
    }

    #[test]
    fn blank_line_parses_to_none() {
        assert!(parse_line("").is_none());
    }

    #[test]
    fn unknown_leading_word_parses_to_none() {
        assert!(parse_line("bogus x").is_none());
    }
}
