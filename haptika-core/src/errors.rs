// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Haptika.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred while reading or writing the underlying byte stream.
    IoError(io::Error),
    /// The reader ran past the end of the bitstream.
    Truncated,
    /// The stream header did not carry a version string this implementation understands.
    BadVersion(&'static str),
    /// An enum tag or field value was outside its legal range.
    RangeViolation(&'static str),
    /// A value was too wide for the bit field it was written into.
    Overflow(&'static str),
    /// An effect references a library id that does not exist in its perception.
    ReferenceUnresolved,
    /// The checksum of a stream unit did not match its payload.
    CrcMismatch,
    /// The SPIHT bit budget is below the block header minimum.
    BudgetTooSmall,
    /// A data model invariant was violated.
    Inconsistent(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::Truncated => {
                write!(f, "unexpected end of bitstream")
            }
            Error::BadVersion(version) => {
                write!(f, "unsupported version: {}", version)
            }
            Error::RangeViolation(msg) => {
                write!(f, "value out of range: {}", msg)
            }
            Error::Overflow(msg) => {
                write!(f, "value too wide for field: {}", msg)
            }
            Error::ReferenceUnresolved => {
                write!(f, "effect references an unknown library id")
            }
            Error::CrcMismatch => {
                write!(f, "crc mismatch")
            }
            Error::BudgetTooSmall => {
                write!(f, "bit budget below the block header minimum")
            }
            Error::Inconsistent(msg) => {
                write!(f, "inconsistent haptic data: {}", msg)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::Truncated,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a truncation error.
pub fn truncated_error<T>() -> Result<T> {
    Err(Error::Truncated)
}

/// Convenience function to create a version error.
pub fn version_error<T>(version: &'static str) -> Result<T> {
    Err(Error::BadVersion(version))
}

/// Convenience function to create a range violation error.
pub fn range_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::RangeViolation(msg))
}

/// Convenience function to create an overflow error.
pub fn overflow_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Overflow(msg))
}

/// Convenience function to create an unresolved reference error.
pub fn reference_error<T>() -> Result<T> {
    Err(Error::ReferenceUnresolved)
}

/// Convenience function to create a crc mismatch error.
pub fn crc_error<T>() -> Result<T> {
    Err(Error::CrcMismatch)
}

/// Convenience function to create a budget error.
pub fn budget_error<T>() -> Result<T> {
    Err(Error::BudgetTooSmall)
}

/// Convenience function to create an inconsistency error.
pub fn inconsistent_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Inconsistent(msg))
}
