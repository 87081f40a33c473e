//! Line protocol of the control socket.
//!
//! A client sends one request per line:
//!
//! ```text
//! READ <handler>
//! WRITE <handler> <value>
//! QUIT
//! ```
//!
//! The server answers with a status line `<code> <message>`. A successful
//! `READ` is followed by a `DATA <length>` line and exactly `<length>`
//! bytes of payload, without terminator.

use anyhow::{Context as _, Result, bail, ensure};
use logos::{Lexer, Logos};
use std::{fmt, io};

/// first line sent by the server on every new connection
pub const BANNER: &str = "Click::ControlSocket/1.3";

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum RequestToken {
    #[token("READ")]
    Read,
    #[token("WRITE")]
    Write,
    #[token("QUIT")]
    Quit,

    #[regex(r"[^ \t\r\n\f]+")]
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Read { handler: &'a str },
    Write { handler: &'a str, value: &'a str },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    SyntaxError,
    NoSuchHandler,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::SyntaxError => 500,
            Self::NoSuchHandler => 511,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.code().fmt(f)
    }
}

impl<'a> Request<'a> {
    /// parse one request line, the line terminator is optional
    ///
    /// ```
    /// # use tmatrix::control::Request;
    /// assert_eq!(
    ///     Request::parse("WRITE traffic_matrix.setSource ADU\r\n").unwrap(),
    ///     Request::Write { handler: "traffic_matrix.setSource", value: "ADU" },
    /// );
    /// ```
    pub fn parse(line: &'a str) -> Result<Self> {
        let mut lex = Lexer::<'a, RequestToken>::new(line);

        let request = match lex.next() {
            Some(Ok(RequestToken::Read)) => Self::Read {
                handler: expect_word(&mut lex)?,
            },
            Some(Ok(RequestToken::Write)) => {
                let handler = expect_word(&mut lex)?;
                let value = lex.remainder().trim();
                return Ok(Self::Write { handler, value });
            }
            Some(Ok(RequestToken::Quit)) => Self::Quit,
            Some(_) => bail!("Unknown command {:?}", lex.slice()),
            None => bail!("Expecting a command"),
        };

        ensure!(
            lex.next().is_none(),
            "Not expecting anything after {:?}",
            lex.slice()
        );

        Ok(request)
    }
}

fn expect_word<'a>(lex: &mut Lexer<'a, RequestToken>) -> Result<&'a str> {
    match lex.next() {
        Some(Ok(_)) => Ok(lex.slice()),
        _ => bail!("Expecting a handler name"),
    }
}

/// the handler part of `element.handler`
///
/// ```
/// # use tmatrix::control::handler_name;
/// assert_eq!(handler_name("traffic_matrix.getTraffic"), "getTraffic");
/// assert_eq!(handler_name("getTraffic"), "getTraffic");
/// ```
pub fn handler_name(target: &str) -> &str {
    target.rsplit('.').next().unwrap_or(target)
}

pub fn write_status(writer: &mut impl io::Write, status: Status, message: &str) -> io::Result<()> {
    write!(writer, "{status} {message}\r\n")
}

pub fn write_data(writer: &mut impl io::Write, payload: &str) -> io::Result<()> {
    write!(writer, "DATA {}\r\n{payload}", payload.len())
}

/// parse a status line, returns the code and the message
pub fn parse_status(line: &str) -> Result<(u16, &str)> {
    let line = line.trim_end();
    let (code, message) = line.split_once(' ').unwrap_or((line, ""));
    let code = code
        .parse()
        .with_context(|| format!("Invalid status line {line:?}"))?;
    Ok((code, message))
}

/// parse the `DATA <length>` line preceding a read payload
pub fn parse_data_length(line: &str) -> Result<usize> {
    let line = line.trim_end();
    let Some(length) = line.strip_prefix("DATA ") else {
        bail!("Expecting a DATA line, received {line:?}")
    };
    length
        .trim()
        .parse()
        .with_context(|| format!("Invalid DATA length {length:?}"))
}
