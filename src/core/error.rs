use std::io;

enum_from_primitive! {
    /// Modbus exception codes returned in the body of an exception response.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum ExceptionCode {
        IllegalFunction      = 0x01,
        IllegalDataAddress   = 0x02,
        IllegalDataValue     = 0x03,
        ServerFailure        = 0x04,
    }
}

/// Detail attached to [`Error::Malformed`] / [`Error::InvalidData`].
#[derive(Debug)]
pub enum Reason {
    ShortFrame,
    LengthMismatch,
    ShortPayload,
    InvalidFunction,
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Error {
        Error::InvalidData(reason)
    }
}

/// The crate-wide error type. Every fallible operation in `core` returns
/// `Result<T, Error>`.
#[derive(Debug)]
pub enum Error {
    /// Frame could not be parsed (`spec.md` MALFORMED). The caller should
    /// drop the frame and keep reading, never respond.
    Malformed(Reason),
    /// Payload present but otherwise invalid for the requested operation.
    InvalidData(Reason),
    /// An installed configuration could not be validated.
    Ingest(IngestError),
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<IngestError> for Error {
    fn from(err: IngestError) -> Error {
        Error::Ingest(err)
    }
}

/// Validation failures raised synchronously by [`crate::core::ingest::ConfigIngest`].
#[derive(Debug, PartialEq)]
pub enum IngestError {
    UnsupportedSpace { operation: &'static str },
    BitIndexOutOfRange(u8),
    NonPositiveInterval(f64),
    ListTooShort { len: usize },
}
