//! MI出力行の構文解析
//!
//! ```text
//! record  := NUMTOKEN? ('^' | '*' | '+' | '=') WORD (',' result)*
//!          | ('~' | '@' | '&') cstring
//! result  := WORD '=' value
//! value   := cstring | '{' [result (',' result)*] '}' | '[' [item (',' item)*] ']'
//! item    := result | value
//! ```

use crate::errors::ParseError;
use crate::lexer::{Lexeme, Lexer};
use crate::record::{
    AsyncKind, AsyncRecord, Record, ResultRecord, StreamKind, StreamRecord, Token, Tuple, Value,
};

/// 1行分のMI出力をレコードに変換する
///
/// 副作用を持たない純粋な関数です。
///
/// # Examples
/// ```
/// use gdbmi_proto::{parse, Record};
///
/// let record = parse("0^done").unwrap();
/// assert_eq!(record.token(), Some(0));
/// assert!(matches!(record, Record::Result(r) if r.class == "done"));
/// ```
pub fn parse(line: &str) -> Result<Record, ParseError> {
    let lexemes = Lexer::new(line).tokenize()?;
    let mut parser = Parser::new(lexemes);
    let record = parser.record()?;
    parser.finish()?;
    Ok(record)
}

/// 字句列に対する再帰下降パーサ
struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn new(lexemes: Vec<Lexeme>) -> Self {
        Self { lexemes, pos: 0 }
    }

    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<Lexeme, ParseError> {
        let lexeme = self
            .lexemes
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(lexeme)
    }

    fn expect(&mut self, wanted: &Lexeme, expected: &'static str) -> Result<(), ParseError> {
        let lexeme = self.next(expected)?;
        if &lexeme == wanted {
            Ok(())
        } else {
            Err(unexpected(expected, &lexeme))
        }
    }

    fn record(&mut self) -> Result<Record, ParseError> {
        let token = match self.peek() {
            Some(Lexeme::NumToken(_)) => Some(self.token()?),
            _ => None,
        };

        let prefix = self.next("record prefix")?;
        let record = match prefix {
            Lexeme::Caret => {
                let (class, fields) = self.class_and_results()?;
                Record::Result(ResultRecord {
                    token,
                    class,
                    fields,
                })
            }
            Lexeme::Asterisk => self.async_record(token, AsyncKind::Exec)?,
            Lexeme::Plus => self.async_record(token, AsyncKind::Status)?,
            Lexeme::Equals => self.async_record(token, AsyncKind::Notify)?,
            Lexeme::Tilde if token.is_none() => self.stream_record(StreamKind::Console)?,
            Lexeme::At if token.is_none() => self.stream_record(StreamKind::Target)?,
            Lexeme::Ampersand if token.is_none() => self.stream_record(StreamKind::Log)?,
            other => return Err(unexpected("record prefix", &other)),
        };
        Ok(record)
    }

    fn token(&mut self) -> Result<Token, ParseError> {
        match self.next("token")? {
            Lexeme::NumToken(digits) => digits
                .parse::<Token>()
                .map_err(|_| ParseError::TokenOverflow(digits)),
            other => Err(unexpected("token", &other)),
        }
    }

    fn async_record(
        &mut self,
        token: Option<Token>,
        kind: AsyncKind,
    ) -> Result<Record, ParseError> {
        let (class, fields) = self.class_and_results()?;
        Ok(Record::Async(AsyncRecord {
            token,
            kind,
            class,
            fields,
        }))
    }

    fn stream_record(&mut self, kind: StreamKind) -> Result<Record, ParseError> {
        self.expect(&Lexeme::Quote, "quoted string")?;
        let text = self.cstring_body()?;
        Ok(Record::Stream(StreamRecord { kind, text }))
    }

    fn class_and_results(&mut self) -> Result<(String, Tuple), ParseError> {
        let class = self.word("record class")?;
        let mut fields = Tuple::new();
        while self.peek() == Some(&Lexeme::Comma) {
            self.pos += 1;
            let (key, value) = self.result()?;
            fields.push(key, value);
        }
        Ok((class, fields))
    }

    fn word(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match self.next(expected)? {
            Lexeme::Word(word) => Ok(word),
            other => Err(unexpected(expected, &other)),
        }
    }

    fn result(&mut self) -> Result<(String, Value), ParseError> {
        let key = self.word("field name")?;
        self.expect(&Lexeme::Equals, "'='")?;
        let value = self.value()?;
        Ok((key, value))
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.next("value")? {
            Lexeme::Quote => Ok(Value::String(self.cstring_body()?)),
            Lexeme::OpenCurly => self.tuple(),
            Lexeme::OpenSquare => self.list(),
            other => Err(unexpected("value", &other)),
        }
    }

    fn tuple(&mut self) -> Result<Value, ParseError> {
        let mut tuple = Tuple::new();
        if self.peek() == Some(&Lexeme::CloseCurly) {
            self.pos += 1;
            return Ok(Value::Tuple(tuple));
        }
        loop {
            let (key, value) = self.result()?;
            tuple.push(key, value);
            match self.next("',' or '}'")? {
                Lexeme::Comma => continue,
                Lexeme::CloseCurly => return Ok(Value::Tuple(tuple)),
                other => return Err(unexpected("',' or '}'", &other)),
            }
        }
    }

    /// リストを読む
    ///
    /// `[frame={...},frame={...}]` のような結果のリストは、
    /// 要素ごとに1エントリのタプルとして保持します。
    fn list(&mut self) -> Result<Value, ParseError> {
        let mut items = Vec::new();
        if self.peek() == Some(&Lexeme::CloseSquare) {
            self.pos += 1;
            return Ok(Value::List(items));
        }
        loop {
            let item = if matches!(self.peek(), Some(Lexeme::Word(_))) {
                let (key, value) = self.result()?;
                let mut entry = Tuple::new();
                entry.push(key, value);
                Value::Tuple(entry)
            } else {
                self.value()?
            };
            items.push(item);
            match self.next("',' or ']'")? {
                Lexeme::Comma => continue,
                Lexeme::CloseSquare => return Ok(Value::List(items)),
                other => return Err(unexpected("',' or ']'", &other)),
            }
        }
    }

    /// 開き引用符の直後から閉じ引用符までを読む
    fn cstring_body(&mut self) -> Result<String, ParseError> {
        let mut bytes = Vec::new();
        loop {
            match self.next("closing quote")? {
                Lexeme::StringContent(content) => bytes.extend_from_slice(&content),
                Lexeme::Quote => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
                other => return Err(unexpected("closing quote", &other)),
            }
        }
    }

    /// 行末の改行以外に字句が残っていないことを確認する
    fn finish(&mut self) -> Result<(), ParseError> {
        while let Some(lexeme) = self.peek() {
            if lexeme != &Lexeme::Newline {
                return Err(unexpected("end of line", lexeme));
            }
            self.pos += 1;
        }
        Ok(())
    }
}

fn unexpected(expected: &'static str, found: &Lexeme) -> ParseError {
    ParseError::UnexpectedToken {
        expected,
        found: found.to_string(),
    }
}
