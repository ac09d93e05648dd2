//! MI出力行の字句解析器
//!
//! NORMAL と QUOTED_STRING の2状態を持つ有限状態機械です。
//! 現在の状態と次の1文字の種別の組から規則を選びます。
//! 同じ文字に複数の規則が該当する場合は、記号を数字・単語より先に判定します。

use crate::errors::ParseError;
use std::fmt;

/// 字句解析器の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    /// 引用符の外
    Normal,
    /// Cスタイル文字列の内側
    QuotedString,
}

/// 字句
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexeme {
    Newline,
    Quote,
    Caret,
    Asterisk,
    Plus,
    Equals,
    Tilde,
    At,
    Ampersand,
    OpenCurly,
    CloseCurly,
    OpenSquare,
    CloseSquare,
    Comma,
    /// 数字の並び
    NumToken(String),
    /// `[A-Za-z0-9\-_]` の並び
    Word(String),
    /// 文字列リテラルの一部（エスケープ解除済みのバイト列）
    StringContent(Vec<u8>),
}

impl fmt::Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lexeme::Newline => write!(f, "newline"),
            Lexeme::Quote => write!(f, "'\"'"),
            Lexeme::Caret => write!(f, "'^'"),
            Lexeme::Asterisk => write!(f, "'*'"),
            Lexeme::Plus => write!(f, "'+'"),
            Lexeme::Equals => write!(f, "'='"),
            Lexeme::Tilde => write!(f, "'~'"),
            Lexeme::At => write!(f, "'@'"),
            Lexeme::Ampersand => write!(f, "'&'"),
            Lexeme::OpenCurly => write!(f, "'{{'"),
            Lexeme::CloseCurly => write!(f, "'}}'"),
            Lexeme::OpenSquare => write!(f, "'['"),
            Lexeme::CloseSquare => write!(f, "']'"),
            Lexeme::Comma => write!(f, "','"),
            Lexeme::NumToken(n) => write!(f, "number {n}"),
            Lexeme::Word(w) => write!(f, "word {w:?}"),
            Lexeme::StringContent(bytes) => {
                write!(f, "string content {:?}", String::from_utf8_lossy(bytes))
            }
        }
    }
}

/// 次の文字の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Newline,
    Quote,
    Backslash,
    Punct,
    Space,
    Digit,
    WordChar,
    Other,
}

fn classify(b: u8) -> CharClass {
    match b {
        b'\n' => CharClass::Newline,
        b'"' => CharClass::Quote,
        b'\\' => CharClass::Backslash,
        b'^' | b'*' | b'+' | b'=' | b'~' | b'@' | b'&' | b'{' | b'}' | b'[' | b']' | b',' => {
            CharClass::Punct
        }
        b' ' | b'\t' | b'\r' | 0x0b | 0x0c => CharClass::Space,
        b'0'..=b'9' => CharClass::Digit,
        b'A'..=b'Z' | b'a'..=b'z' | b'-' | b'_' => CharClass::WordChar,
        _ => CharClass::Other,
    }
}

fn punctuation(b: u8) -> Option<Lexeme> {
    let lexeme = match b {
        b'^' => Lexeme::Caret,
        b'*' => Lexeme::Asterisk,
        b'+' => Lexeme::Plus,
        b'=' => Lexeme::Equals,
        b'~' => Lexeme::Tilde,
        b'@' => Lexeme::At,
        b'&' => Lexeme::Ampersand,
        b'{' => Lexeme::OpenCurly,
        b'}' => Lexeme::CloseCurly,
        b'[' => Lexeme::OpenSquare,
        b']' => Lexeme::CloseSquare,
        b',' => Lexeme::Comma,
        _ => return None,
    };
    Some(lexeme)
}

/// 名前付きエスケープ（`\n` など）の値
fn named_escape(b: u8) -> Option<u8> {
    let value = match b {
        b'a' => 0x07,
        b'b' => 0x08,
        b'f' => 0x0c,
        b'n' => 0x0a,
        b'r' => 0x0d,
        b't' => 0x09,
        b'v' => 0x0b,
        b'\\' => b'\\',
        b'\'' => b'\'',
        b'"' => b'"',
        b'?' => b'?',
        _ => return None,
    };
    Some(value)
}

/// 字句解析器
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    state: LexState,
}

impl<'a> Lexer<'a> {
    /// 1行分の入力から字句解析器を作成する
    pub fn new(line: &'a str) -> Self {
        Self {
            input: line.as_bytes(),
            pos: 0,
            state: LexState::Normal,
        }
    }

    /// 現在の状態を取得する
    pub fn state(&self) -> LexState {
        self.state
    }

    /// 入力全体を字句列に変換する
    pub fn tokenize(mut self) -> Result<Vec<Lexeme>, ParseError> {
        let mut lexemes = Vec::new();
        while let Some(lexeme) = self.next_lexeme()? {
            lexemes.push(lexeme);
        }
        Ok(lexemes)
    }

    /// 次の字句を取り出す
    ///
    /// 入力の終わりに達した場合は `None` を返します。
    pub fn next_lexeme(&mut self) -> Result<Option<Lexeme>, ParseError> {
        loop {
            let Some(&b) = self.input.get(self.pos) else {
                return Ok(None);
            };

            let lexeme = match (self.state, classify(b)) {
                (LexState::Normal, CharClass::Newline) => {
                    self.pos += 1;
                    Some(Lexeme::Newline)
                }
                (LexState::Normal, CharClass::Quote) => {
                    self.pos += 1;
                    self.state = LexState::QuotedString;
                    Some(Lexeme::Quote)
                }
                (LexState::Normal, CharClass::Punct) => match punctuation(b) {
                    Some(lexeme) => {
                        self.pos += 1;
                        Some(lexeme)
                    }
                    None => return Err(self.error_at(self.pos)),
                },
                (LexState::Normal, CharClass::Space) => {
                    self.take_run(|c| c == CharClass::Space);
                    None
                }
                (LexState::Normal, CharClass::Digit) => {
                    let run = self.take_run(|c| c == CharClass::Digit);
                    Some(Lexeme::NumToken(String::from_utf8_lossy(run).into_owned()))
                }
                (LexState::Normal, CharClass::WordChar) => {
                    let run = self.take_run(|c| matches!(c, CharClass::Digit | CharClass::WordChar));
                    Some(Lexeme::Word(String::from_utf8_lossy(run).into_owned()))
                }
                (LexState::Normal, CharClass::Backslash | CharClass::Other) => {
                    return Err(self.error_at(self.pos));
                }
                (LexState::QuotedString, CharClass::Quote) => {
                    self.pos += 1;
                    self.state = LexState::Normal;
                    Some(Lexeme::Quote)
                }
                (LexState::QuotedString, CharClass::Backslash) => {
                    Some(Lexeme::StringContent(self.escape()?))
                }
                (LexState::QuotedString, _) => {
                    let run =
                        self.take_run(|c| !matches!(c, CharClass::Quote | CharClass::Backslash));
                    Some(Lexeme::StringContent(run.to_vec()))
                }
            };

            if let Some(lexeme) = lexeme {
                return Ok(Some(lexeme));
            }
        }
    }

    /// 条件を満たす文字が続く限り読み進める
    fn take_run(&mut self, accept: impl Fn(CharClass) -> bool) -> &'a [u8] {
        let input = self.input;
        let start = self.pos;
        let len = input
            .get(start..)
            .unwrap_or_default()
            .iter()
            .take_while(|b| accept(classify(**b)))
            .count();
        self.pos = start + len;
        input.get(start..self.pos).unwrap_or_default()
    }

    /// バックスラッシュで始まるエスケープを解釈する
    fn escape(&mut self) -> Result<Vec<u8>, ParseError> {
        let start = self.pos;
        let Some(&kind) = self.input.get(start + 1) else {
            return Err(self.error_at(start));
        };

        let bytes = match kind {
            b'0'..=b'7' => {
                // 1〜3桁の8進数。255を超える値は下位8ビットを使う
                let digits = self
                    .input
                    .get(start + 1..)
                    .unwrap_or_default()
                    .iter()
                    .take(3)
                    .take_while(|d| (b'0'..=b'7').contains(*d))
                    .count();
                let value = self.radix_value(start + 1, digits, 8);
                self.pos = start + 1 + digits;
                vec![(value & 0xff) as u8]
            }
            b'x' => vec![self.hex_escape(start, 2)? as u8],
            b'u' => {
                let value = self.hex_escape(start, 4)?;
                self.code_point(start, value)?
            }
            b'U' => {
                let value = self.hex_escape(start, 8)?;
                self.code_point(start, value)?
            }
            other => match named_escape(other) {
                Some(value) => {
                    self.pos = start + 2;
                    vec![value]
                }
                None => return Err(self.error_at(start)),
            },
        };
        Ok(bytes)
    }

    /// `\x` `\u` `\U` に続く固定桁数の16進数を読む
    fn hex_escape(&mut self, start: usize, width: usize) -> Result<u32, ParseError> {
        let digits_start = start + 2;
        let valid = self
            .input
            .get(digits_start..digits_start + width)
            .is_some_and(|digits| digits.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(self.error_at(start));
        }
        let value = self.radix_value(digits_start, width, 16);
        self.pos = digits_start + width;
        Ok(value)
    }

    fn radix_value(&self, from: usize, len: usize, radix: u32) -> u32 {
        self.input
            .get(from..from + len)
            .unwrap_or_default()
            .iter()
            .fold(0u32, |acc, d| {
                acc.wrapping_mul(radix)
                    .wrapping_add(char::from(*d).to_digit(radix).unwrap_or(0))
            })
    }

    fn code_point(&self, start: usize, value: u32) -> Result<Vec<u8>, ParseError> {
        char::from_u32(value)
            .map(|c| c.to_string().into_bytes())
            .ok_or_else(|| self.error_at(start))
    }

    fn error_at(&self, offset: usize) -> ParseError {
        let end = (offset + 5).min(self.input.len());
        let snippet = self.input.get(offset..end).unwrap_or_default();
        ParseError::Lex {
            state: self.state,
            offset,
            snippet: String::from_utf8_lossy(snippet).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 文字列リテラルの中身を連結して返す
    fn string_contents(line: &str) -> Vec<u8> {
        Lexer::new(line)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter_map(|l| match l {
                Lexeme::StringContent(bytes) => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_normal_state_lexemes() {
        let lexemes = Lexer::new("12^done,id=\"i1\"\n").tokenize().unwrap();
        assert_eq!(
            lexemes,
            vec![
                Lexeme::NumToken("12".to_string()),
                Lexeme::Caret,
                Lexeme::Word("done".to_string()),
                Lexeme::Comma,
                Lexeme::Word("id".to_string()),
                Lexeme::Equals,
                Lexeme::Quote,
                Lexeme::StringContent(b"i1".to_vec()),
                Lexeme::Quote,
                Lexeme::Newline,
            ]
        );
    }

    #[test]
    fn test_digits_before_word() {
        // 数字の並びは単語より先に判定される
        let lexemes = Lexer::new("7thread-group_1").tokenize().unwrap();
        assert_eq!(
            lexemes,
            vec![
                Lexeme::NumToken("7".to_string()),
                Lexeme::Word("thread-group_1".to_string()),
            ]
        );
    }

    #[test]
    fn test_whitespace_is_skipped() {
        let lexemes = Lexer::new(" ^ \t done ").tokenize().unwrap();
        assert_eq!(lexemes, vec![Lexeme::Caret, Lexeme::Word("done".to_string())]);
    }

    #[test]
    fn test_numeric_escapes() {
        assert_eq!(string_contents(r#""\101""#), b"A");
        assert_eq!(string_contents(r#""\x41""#), b"A");
        assert_eq!(string_contents(r#""\u0041""#), b"A");
        assert_eq!(string_contents(r#""\U00000041""#), b"A");
        // 3桁までしか読まない
        assert_eq!(string_contents(r#""\1011""#), b"A1");
        assert_eq!(string_contents(r#""\0""#), b"\0");
    }

    #[test]
    fn test_unicode_escape_is_utf8_encoded() {
        assert_eq!(string_contents(r#""\u00e9""#), "é".as_bytes());
        assert_eq!(string_contents(r#""\U0001F600""#), "😀".as_bytes());
    }

    #[test]
    fn test_named_escapes() {
        assert_eq!(
            string_contents(r#""\a\b\f\n\r\t\v\\\'\"\?""#),
            b"\x07\x08\x0c\n\r\t\x0b\\'\"?"
        );
    }

    #[test]
    fn test_unknown_escape_fails() {
        let err = Lexer::new(r#""\q""#).tokenize().unwrap_err();
        match err {
            ParseError::Lex { state, offset, .. } => {
                assert_eq!(state, LexState::QuotedString);
                assert_eq!(offset, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_hex_escape_fails() {
        assert!(Lexer::new(r#""\x4""#).tokenize().is_err());
        assert!(Lexer::new(r#""\u004""#).tokenize().is_err());
    }

    #[test]
    fn test_surrogate_code_point_fails() {
        assert!(Lexer::new(r#""\ud800""#).tokenize().is_err());
    }

    #[test]
    fn test_unlexable_character_in_normal_state() {
        let err = Lexer::new("(gdb)").tokenize().unwrap_err();
        assert!(matches!(
            err,
            ParseError::Lex { state: LexState::Normal, offset: 0, .. }
        ));
    }

    #[test]
    fn test_state_returns_to_normal_after_quote() {
        let mut lexer = Lexer::new("\"a\"");
        assert_eq!(lexer.next_lexeme().unwrap(), Some(Lexeme::Quote));
        assert_eq!(lexer.state(), LexState::QuotedString);
        lexer.next_lexeme().unwrap();
        assert_eq!(lexer.next_lexeme().unwrap(), Some(Lexeme::Quote));
        assert_eq!(lexer.state(), LexState::Normal);
        assert_eq!(lexer.next_lexeme().unwrap(), None);
    }
}
