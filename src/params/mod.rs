//! Parameter extraction for one command line
//!
//! `CodeLine` is the parsed form of a single G-code line. `Params` reads it with
//! the channel's unit system applied, which is what the cycle handlers consume.

use crate::lexer::{self, LexError, Span, Token};
use crate::machine::Units;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("letter {letter} has no value")]
    MissingValue { letter: char, span: Span },

    #[error("value without a letter")]
    StrayValue { span: Span },

    #[error("{letter} parameter given twice")]
    Duplicate { letter: char, span: Span },

    #[error("{letter} parameter is not a number")]
    NotANumber { letter: char },

    #[error("{letter} parameter is not an integer: {value}")]
    NotAnInteger { letter: char, value: f64 },

    #[error("{letter} parameter not found")]
    NotFound { letter: char },
}

impl ParamError {
    /// Column range in the source line, for diagnostics
    pub fn span(&self) -> Option<Span> {
        match self {
            ParamError::Lex(e) => Some(e.span.clone()),
            ParamError::MissingValue { span, .. }
            | ParamError::StrayValue { span }
            | ParamError::Duplicate { span, .. } => Some(span.clone()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParamError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub letter: char,
    pub value: Value,
    pub span: Span,
}

/// One parsed line: an optional command word followed by parameter words
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeLine {
    pub text: String,
    pub line_number: Option<u32>,
    command: Option<Word>,
    words: Vec<Word>,
}

impl CodeLine {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = lexer::lex(text)?;
        let mut words: Vec<Word> = Vec::new();
        let mut iter = tokens.into_iter().peekable();

        while let Some((token, span)) = iter.next() {
            let letter = match token {
                Token::Letter(letter) => letter,
                Token::Number(_) | Token::String(_) => return Err(ParamError::StrayValue { span }),
                Token::Comment => continue,
            };
            let value = match iter.peek() {
                Some((Token::Number(n), _)) => Value::Number(*n),
                Some((Token::String(s), _)) => Value::Text(s.clone()),
                _ => return Err(ParamError::MissingValue { letter, span }),
            };
            let end = iter.next().map(|(_, s)| s.end).unwrap_or(span.end);
            words.push(Word {
                letter,
                value,
                span: span.start..end,
            });
        }

        let mut line = CodeLine {
            text: text.to_string(),
            ..CodeLine::default()
        };

        let mut rest = words.into_iter().peekable();
        if let Some(Word { letter: 'N', value: Value::Number(n), .. }) = rest.peek() {
            line.line_number = Some(*n as u32);
            rest.next();
        }
        line.command = rest.next();

        for word in rest {
            if line.words.iter().any(|w| w.letter == word.letter) {
                return Err(ParamError::Duplicate {
                    letter: word.letter,
                    span: word.span,
                });
            }
            line.words.push(word);
        }
        Ok(line)
    }

    pub fn is_empty(&self) -> bool {
        self.command.is_none()
    }

    /// First word of the line, e.g. `G` for `G83 ...` or `X` for a bare `X10 Z2`
    pub fn command_letter(&self) -> Option<char> {
        self.command.as_ref().map(|w| w.letter)
    }

    /// Integer part of the command word's value
    pub fn command_number(&self) -> Option<i32> {
        match self.command.as_ref().map(|w| &w.value) {
            Some(Value::Number(n)) => Some(n.trunc() as i32),
            _ => None,
        }
    }

    /// Raw value of the command word when the line continues a modal command
    pub fn modal_command_number(&self) -> Option<f64> {
        match self.command.as_ref().map(|w| &w.value) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    fn word(&self, letter: char) -> Option<&Word> {
        self.words.iter().find(|w| w.letter == letter)
    }

    pub fn seen(&self, letter: char) -> bool {
        self.word(letter).is_some()
    }

    /// Seen either as a parameter or as the command word itself
    pub fn seen_anywhere(&self, letter: char) -> bool {
        self.command_letter() == Some(letter) || self.seen(letter)
    }

    pub fn letters(&self) -> impl Iterator<Item = char> + '_ {
        self.words.iter().map(|w| w.letter)
    }

    pub fn float(&self, letter: char) -> Result<Option<f64>> {
        match self.word(letter).map(|w| &w.value) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(Value::Text(_)) => Err(ParamError::NotANumber { letter }),
        }
    }

    pub fn string(&self, letter: char) -> Option<&str> {
        match self.word(letter).map(|w| &w.value) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Typed reader over a line, applying the channel's units to distances
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    line: &'a CodeLine,
    units: Units,
}

impl<'a> Params<'a> {
    pub fn new(line: &'a CodeLine, units: Units) -> Self {
        Self { line, units }
    }

    pub fn line(&self) -> &'a CodeLine {
        self.line
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn seen(&self, letter: char) -> bool {
        self.line.seen(letter)
    }

    pub fn float(&self, letter: char) -> Result<Option<f64>> {
        self.line.float(letter)
    }

    pub fn int(&self, letter: char) -> Result<Option<i32>> {
        match self.line.float(letter)? {
            None => Ok(None),
            Some(v) if v.fract() == 0.0 => Ok(Some(v as i32)),
            Some(value) => Err(ParamError::NotAnInteger { letter, value }),
        }
    }

    /// Length in millimetres
    pub fn distance(&self, letter: char) -> Result<Option<f64>> {
        Ok(self.line.float(letter)?.map(|v| self.units.to_mm(v)))
    }

    /// Feed rate in millimetres per minute
    pub fn feed_rate(&self, letter: char) -> Result<Option<f64>> {
        self.distance(letter)
    }

    pub fn string(&self, letter: char) -> Option<&'a str> {
        self.line.string(letter)
    }

    /// Axis word in millimetres, also when it leads a modal continuation line
    pub fn axis_word(&self, letter: char) -> Result<Option<f64>> {
        if self.line.command_letter() == Some(letter) {
            return Ok(self.line.modal_command_number().map(|v| self.units.to_mm(v)));
        }
        self.distance(letter)
    }

    pub fn require_float(&self, letter: char) -> Result<f64> {
        self.float(letter)?.ok_or(ParamError::NotFound { letter })
    }

    pub fn require_int(&self, letter: char) -> Result<i32> {
        self.int(letter)?.ok_or(ParamError::NotFound { letter })
    }

    pub fn require_distance(&self, letter: char) -> Result<f64> {
        self.distance(letter)?.ok_or(ParamError::NotFound { letter })
    }

    pub fn require_feed_rate(&self, letter: char) -> Result<f64> {
        self.feed_rate(letter)?.ok_or(ParamError::NotFound { letter })
    }
}

/// Tool numbers of 100 and above carry an offset in the last two digits
pub fn tool_number(raw: i32) -> u32 {
    let raw = raw.max(0) as u32;
    if raw >= 100 {
        raw / 100
    } else {
        raw
    }
}
