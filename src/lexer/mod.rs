use logos::Logos;
use thiserror::Error;

pub type Span = logos::Span;

/// Tokens for one line of G-code
/// Words are a letter followed by a number, e.g. `G83`, `Z-10.5`, `P"file.g"`
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f\r\n]+")] // Skip whitespace
#[logos(error = InvalidToken)]
pub enum Token {
    #[regex(r"[A-Za-z]", |lex| lex.slice().chars().next().map(|c| c.to_ascii_uppercase()))]
    Letter(char),

    #[regex(r"[-+]?(\d+\.?\d*|\.\d+)", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""[^"]*""#, |lex| lex.slice()[1..lex.slice().len()-1].to_string())]
    String(String),

    // Comments, checksums and the program delimiter carry nothing for the interpreter
    #[regex(r";[^\n]*", logos::skip)]
    #[regex(r"\([^)\n]*\)", logos::skip)]
    #[regex(r"\*\d+", logos::skip)]
    #[token("%", logos::skip)]
    Comment,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvalidToken;

impl std::fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid token")
    }
}

impl std::error::Error for InvalidToken {}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unexpected input '{text}' at column {column}")]
pub struct LexError {
    pub span: Span,
    pub text: String,
    pub column: usize,
}

/// Lex one line into tokens, stopping at the first character that is not valid G-code
pub fn lex(input: &str) -> Result<Vec<(Token, Span)>, LexError> {
    Token::lexer(input)
        .spanned()
        .map(|(result, span)| match result {
            Ok(token) => Ok((token, span)),
            Err(_) => Err(LexError {
                text: input[span.clone()].to_string(),
                column: span.start + 1,
                span,
            }),
        })
        .collect()
}
