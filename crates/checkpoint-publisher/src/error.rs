use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A bulk header fetch failed for the batch ending at `bound`.
    Fetch { bound: u64 },
    /// The ledger's last line is not a `height,hash` checkpoint.
    Parse,
    /// The ledger is ahead of the network height minus the delay window.
    Range,
    /// The pin service rejected the pin request itself.
    PinSubmit,
    /// The pin service processed the job but never pinned the content.
    PinFailed,
    Http,
    Config,
    Other,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Other, msg)
    }

    pub fn with_kind<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn fetch(bound: u64, cause: impl fmt::Display) -> Self {
        Self::with_kind(
            ErrorKind::Fetch { bound },
            format!("failed to fetch checkpoint batch up to height {bound}: {cause}"),
        )
    }

    pub fn parse<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Parse, msg)
    }

    pub fn range<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Range, msg)
    }

    pub fn pin_submit(hash: &str, cause: impl fmt::Display) -> Self {
        Self::with_kind(
            ErrorKind::PinSubmit,
            format!("pin request for {hash} was rejected: {cause}"),
        )
    }

    pub fn pin_failed(hash: &str) -> Self {
        Self::with_kind(
            ErrorKind::PinFailed,
            format!("pin service finished processing {hash} but it never appeared in the pinned set"),
        )
    }

    pub fn http<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Http, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Config, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Upper bound of the batch that failed, for fetch errors.
    pub fn batch_bound(&self) -> Option<u64> {
        match self.kind {
            ErrorKind::Fetch { bound } => Some(bound),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("json error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_carries_bound() {
        let err = Error::fetch(2120, "connection reset");
        assert_eq!(err.kind(), ErrorKind::Fetch { bound: 2120 });
        assert_eq!(err.batch_bound(), Some(2120));
        assert!(err.to_string().contains("2120"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn pin_errors_are_distinct() {
        let submit = Error::pin_submit("QmHash", "401 Unauthorized");
        let failed = Error::pin_failed("QmHash");
        assert_eq!(submit.kind(), ErrorKind::PinSubmit);
        assert_eq!(failed.kind(), ErrorKind::PinFailed);
        assert_eq!(failed.batch_bound(), None);
    }
}
