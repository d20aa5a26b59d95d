//! This module implements small text utilities for master files: a token
//! stream with one token of look-ahead, and `key=value` splitting.

use crate::error::*;

/// A word of a master file, with the line it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Token {
  /// The text.
  pub(crate) text: String,
  /// 1-based line number.
  pub(crate) line: usize
}

/// Whitespace-delimited words of a text, consumed one at a time.
pub(crate) struct TokenStream {
  /// All the tokens.
  tokens: Vec<Token>,
  /// Index of the next token.
  pos: usize,
  /// Name of the source, for messages.
  source: String
}

impl TokenStream {
  /// Splits lines into tokens. `first_line` is the number of the first line.
  pub(crate) fn new<'a, I: Iterator<Item = &'a str>>(
    lines: I,
    first_line: usize,
    source: &str
  ) -> Self {
    let tokens = lines
      .enumerate()
      .flat_map(|(i, l)| {
        l.split_whitespace().map(move |w| Token {
          text: w.to_string(),
          line: first_line + i
        })
      })
      .collect();
    return Self { tokens, pos: 0, source: source.to_string() };
  }

  /// Looks at the next token without consuming it.
  pub(crate) fn peek(&self) -> Option<&Token> {
    return self.tokens.get(self.pos);
  }

  /// Consumes the next token, if any.
  pub(crate) fn next_token(&mut self) -> Option<Token> {
    let t = self.tokens.get(self.pos).cloned();
    if t.is_some() {
      self.pos += 1;
    }
    return t;
  }

  /// Consumes the next token, failing at the end of the stream.
  pub(crate) fn expect(&mut self, what: &str) -> LataResult<Token> {
    let line = self.tokens.last().map_or(0, |t| t.line);
    return self.next_token().ok_or_else(|| LataError::read(format!(
      "{}:{}: unexpected end of file, expected {}", self.source, line, what
    )));
  }

  /// The line of the last consumed token.
  pub(crate) fn line(&self) -> usize {
    return self.pos
      .checked_sub(1)
      .and_then(|p| self.tokens.get(p))
      .map_or(0, |t| t.line);
  }

  /// Name of the source.
  pub(crate) fn source(&self) -> &str {
    return &self.source;
  }

  /// Reads a `key=value` attribute if the next token looks like one. A
  /// value missing after the `=` is taken from the following token. The key
  /// comes back lowercase.
  pub(crate) fn attribute(&mut self) -> LataResult<Option<(String, String)>> {
    let (key, value) = match self.peek().and_then(|t| split_attribute(&t.text)) {
      Some(kv) => kv,
      None => return Ok(None)
    };
    self.pos += 1;
    if value.is_empty() {
      let v = self.expect(&format!("a value for \"{}\"", key))?;
      return Ok(Some((key, v.text)));
    }
    return Ok(Some((key, value)));
  }
}

/// Splits a `key=value` word. Returns `None` if there is no `=` or no key.
pub(crate) fn split_attribute(word: &str) -> Option<(String, String)> {
  let (key, value) = word.split_once('=')?;
  if key.is_empty() {
    return None;
  }
  return Some((key.to_ascii_lowercase(), value.to_string()));
}

/// Parses a number from an attribute value, with a located message.
pub(crate) fn parse_num<T: std::str::FromStr>(
  value: &str,
  key: &str,
  ts: &TokenStream
) -> LataResult<T> {
  return value.parse::<T>().map_err(|_| LataError::read(format!(
    "{}:{}: bad value \"{}\" for \"{}\"", ts.source(), ts.line(), value, key
  )));
}
