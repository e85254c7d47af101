use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric codes carried alongside the error kind.
pub const CODE_CLIENT: u32 = 1;
pub const CODE_KMS: u32 = 2;
pub const CODE_NETWORK: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse, bad input, wrong state.
    Client,
    /// The remote KMS returned an error or an undecryptable response.
    Kms,
    /// A transport failure relayed by the caller via `KmsContext::fail`.
    Network,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Client => "client",
            ErrorKind::Kms => "kms",
            ErrorKind::Network => "network",
        };
        f.write_str(s)
    }
}

/// A single recorded failure. Clonable so a context can keep the first
/// failure and hand copies to every later driver call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error {code}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
}

impl Error {
    pub fn client(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Client,
            code: CODE_CLIENT,
            message: message.into(),
        }
    }

    pub fn kms(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Kms,
            code: CODE_KMS,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Network,
            code: CODE_NETWORK,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = code;
        self
    }
}

/// Per-context status channel: ok, or the first recorded failure.
#[derive(Debug, Clone, Default)]
pub struct Status(Option<Error>);

impl Status {
    pub fn ok() -> Self {
        Status(None)
    }

    pub fn is_ok(&self) -> bool {
        self.0.is_none()
    }

    pub fn error(&self) -> Option<&Error> {
        self.0.as_ref()
    }

    /// First failure wins; later writes are ignored.
    pub fn set_once(&mut self, err: Error) {
        if self.0.is_none() {
            self.0 = Some(err);
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.0 {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        Status(Some(e))
    }
}
