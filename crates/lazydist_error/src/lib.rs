//! Error type shared by every lazydist crate.
//!
//! Errors carry a kind, a human readable message, optional structured
//! fields, and an optional source error. Worker errors travel across the
//! process boundary as plain strings and are rebuilt on the coordinator
//! with [`ErrorKind::from_name`].

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    General,
    /// User provided a value that can't be used.
    InvalidInput,
    /// Malformed plan construction or rewrite.
    Plan,
    /// Error returned by the external optimizer/executor.
    Backend,
    /// Error raised by a computation running on a worker.
    Remote,
    /// Process group used in the wrong state, or a malformed/unexpected
    /// message on the group channel.
    Protocol,
    /// Broken internal invariant.
    Internal,
    Io,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::General => "General",
            Self::InvalidInput => "InvalidInput",
            Self::Plan => "Plan",
            Self::Backend => "Backend",
            Self::Remote => "Remote",
            Self::Protocol => "Protocol",
            Self::Internal => "Internal",
            Self::Io => "Io",
        }
    }

    /// Parse a kind from its name. Unknown names map to `General`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "InvalidInput" => Self::InvalidInput,
            "Plan" => Self::Plan,
            "Backend" => Self::Backend,
            "Remote" => Self::Remote,
            "Protocol" => Self::Protocol,
            "Internal" => Self::Internal,
            "Io" => Self::Io,
            _ => Self::General,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorField {
    pub key: String,
    pub value: String,
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    kind: ErrorKind,
    msg: String,
    fields: Vec<ErrorField>,
    source: Option<Box<dyn Error + Send + Sync>>,
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind: ErrorKind::General,
                msg: msg.into(),
                fields: Vec::new(),
                source: None,
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn plan(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Plan)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Protocol)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Internal)
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Backend)
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Remote)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::InvalidInput)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Attach a key/value pair to the error.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.inner.fields.push(ErrorField {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    /// Replace the source of this error.
    pub fn caused_by<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.inner.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn fields(&self) -> &[ErrorField] {
        &self.inner.fields
    }

    /// Get the value of the first field with the given key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        for field in &self.inner.fields {
            write!(f, "\n  {}: {}", field.key, field.value)?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }
        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        DbError::with_source("IO error", Box::new(value)).with_kind(ErrorKind::Io)
    }
}

impl From<fmt::Error> for DbError {
    fn from(value: fmt::Error) -> Self {
        DbError::with_source("Format error", Box::new(value))
    }
}

pub trait ResultExt<T, E> {
    /// Wrap the error with a static message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap the error with a lazily built message.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| DbError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DbError::with_source(f(), Box::new(e)))
    }
}

pub trait OptionExt<T> {
    /// Error if the value is None.
    fn required(self, what: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &'static str) -> Result<T> {
        self.ok_or_else(|| DbError::internal(format!("Missing required value: {what}")))
    }
}

/// Return a "not implemented" error from the enclosing function.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::DbError::new(format!("Not implemented: {}", format_args!($($arg)*))))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_fields_and_source() {
        let inner = DbError::new("inner failure");
        let err = DbError::remote("outer")
            .with_field("rank", 2)
            .caused_by(inner);

        assert_eq!("outer\n  rank: 2\nError source: inner failure", err.to_string());
        assert_eq!(Some("2"), err.field("rank"));
        assert_eq!(ErrorKind::Remote, err.kind());
        assert!(err.source().is_some());
    }

    #[test]
    fn kind_name_roundtrip() {
        for kind in [
            ErrorKind::General,
            ErrorKind::InvalidInput,
            ErrorKind::Plan,
            ErrorKind::Backend,
            ErrorKind::Remote,
            ErrorKind::Protocol,
            ErrorKind::Internal,
            ErrorKind::Io,
        ] {
            assert_eq!(kind, ErrorKind::from_name(kind.as_str()));
        }
        assert_eq!(ErrorKind::General, ErrorKind::from_name("whatever"));
    }

    #[test]
    fn required_on_none() {
        let v: Option<i32> = None;
        let err = v.required("count").unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
        assert_eq!("Missing required value: count", err.get_msg());
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk on fire"));
        let err = res.context("writing frame").unwrap_err();
        assert_eq!("writing frame", err.get_msg());
        assert_eq!("disk on fire", err.source().unwrap().to_string());
    }

    #[test]
    fn not_implemented_macro() {
        fn f() -> Result<()> {
            not_implemented!("iceberg writes for {}", "v1 tables")
        }
        let err = f().unwrap_err();
        assert_eq!("Not implemented: iceberg writes for v1 tables", err.get_msg());
    }
}
