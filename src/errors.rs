use std::{fmt, io, num::{ParseFloatError, ParseIntError, TryFromIntError}, str::Utf8Error};
use quick_xml::events::attributes::AttrError;
use png::EncodingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Xml,
    Parse,
    MissingAttribute,
    DuplicateId,
    DegenerateWay,
    UnknownNode,
    MissingBounds,
    Table,
    Cache,
    Render,
    Config,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::new(ErrorKind::Io, value.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        Error::new(ErrorKind::Xml, value.to_string())
    }
}

impl From<AttrError> for Error {
    fn from(value: AttrError) -> Self {
        Error::new(ErrorKind::Xml, value.to_string())
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Error::new(ErrorKind::Xml, value.to_string())
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error::new(ErrorKind::Parse, value.to_string())
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error::new(ErrorKind::Parse, value.to_string())
    }
}

impl From<TryFromIntError> for Error {
    fn from(value: TryFromIntError) -> Self {
        Error::new(ErrorKind::Parse, value.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Error::new(ErrorKind::Table, value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::new(ErrorKind::Config, value.to_string())
    }
}

impl From<EncodingError> for Error {
    fn from(value: EncodingError) -> Self {
        Error::new(ErrorKind::Render, value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
