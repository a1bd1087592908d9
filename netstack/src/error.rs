use failure::Fail;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way an operation of the stack can fail.
///
/// Running out of time while receiving is not in here: receive calls return `Ok(None)`.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "link layer failure: {}", _0)]
    Link(#[cause] io::Error),

    #[fail(display = "no route to {}", _0)]
    NoRoute(Ipv4Addr),

    #[fail(display = "no ARP reply from {}", _0)]
    ArpTimeout(Ipv4Addr),

    #[fail(display = "refusing to send an empty payload")]
    EmptyPayload,

    #[fail(display = "payload of {} bytes exceeds the maximum of {}", len, max)]
    PayloadTooLarge { len: usize, max: usize },

    #[fail(display = "route table is full")]
    TableFull,

    #[fail(display = "{}:{}: {}", path, line, reason)]
    Config {
        path: String,
        line: usize,
        reason: String,
    },

    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] io::Error),
}

impl Error {
    pub(crate) fn config(path: &Path, line: usize, reason: impl Into<String>) -> Error {
        Error::Config {
            path: path.display().to_string(),
            line,
            reason: reason.into(),
        }
    }
}
