// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Error types for HyperLogLog++ sketch operations

use std::fmt;

/// ErrorKind is all kinds of Error of hllpp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The precision pair of a sketch is out of range.
    ConfigInvalid,
    /// The serialized sketch is truncated or otherwise malformed.
    MalformedDeserializeData,
    /// A serialized field carries a wire type other than the one its field number requires.
    UnexpectedWireType,
    /// The serialized aggregator is not a HyperLogLog++ sketch.
    UnsupportedSketchType,
    /// The serialized sketch uses an encoding version this crate cannot read.
    UnsupportedEncodingVersion,
    /// The serialized sketch carries both normal and sparse data.
    ConflictingRepresentation,
    /// Two sketches with different precisions cannot be merged.
    IncompatiblePrecision,
}

impl ErrorKind {
    /// Convert this error kind instance into static str.
    pub const fn into_static(self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::MalformedDeserializeData => "MalformedDeserializeData",
            ErrorKind::UnexpectedWireType => "UnexpectedWireType",
            ErrorKind::UnsupportedSketchType => "UnsupportedSketchType",
            ErrorKind::UnsupportedEncodingVersion => "UnsupportedEncodingVersion",
            ErrorKind::ConflictingRepresentation => "ConflictingRepresentation",
            ErrorKind::IncompatiblePrecision => "IncompatiblePrecision",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

/// Error is the error struct returned by all hllpp functions.
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::default(),
            source: None,
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Panics
    ///
    /// Panics if the source has been set.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::error::Error as _;
    /// use hllpp::error::{Error, ErrorKind};
    ///
    /// let mut error = Error::new(ErrorKind::MalformedDeserializeData, "failed to decode sketch");
    /// assert!(error.source().is_none());
    /// error = error.set_source(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    /// assert!(error.source().is_some());
    /// ```
    pub fn set_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(src.into());
        self
    }

    /// Return error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error's message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

impl Error {
    pub(crate) fn invalid_precision(precision: u8, sparse_precision: u8) -> Self {
        Self::new(
            ErrorKind::ConfigInvalid,
            "precisions must satisfy 4 <= p <= p' <= 25",
        )
        .with_context("precision", precision)
        .with_context("sparse_precision", sparse_precision)
    }

    pub(crate) fn deserial(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedDeserializeData, message)
    }

    pub(crate) fn insufficient_data(field: &'static str) -> Self {
        Self::deserial("insufficient data").with_context("field", field)
    }

    pub(crate) fn unexpected_wire_type(field: u32, expected: u32, actual: u32) -> Self {
        Self::new(ErrorKind::UnexpectedWireType, "unexpected wire type")
            .with_context("field", field)
            .with_context("expected", expected)
            .with_context("actual", actual)
    }

    pub(crate) fn unsupported_sketch_type(expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorKind::UnsupportedSketchType,
            format!("expected aggregator type {expected}, got {actual}"),
        )
        .with_context("type", actual)
    }

    pub(crate) fn unsupported_encoding_version(expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorKind::UnsupportedEncodingVersion,
            format!("expected encoding version {expected}, got {actual}"),
        )
        .with_context("encoding_version", actual)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "   {k}: {v}")?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "   {source:#}")?;
        }

        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use googletest::assert_that;
    use googletest::prelude::contains_substring;

    use super::*;

    #[test]
    fn test_display_includes_context_and_message() {
        let err = Error::unexpected_wire_type(3, 0, 2);
        let msg = err.to_string();
        assert_that!(msg.as_str(), contains_substring("UnexpectedWireType"));
        assert_that!(msg.as_str(), contains_substring("field: 3"));
        assert_that!(msg.as_str(), contains_substring("expected: 0"));
        assert_that!(msg.as_str(), contains_substring("actual: 2"));
    }

    #[test]
    fn test_debug_lists_context() {
        let err = Error::invalid_precision(3, 20);
        let msg = format!("{err:?}");
        assert_that!(msg.as_str(), contains_substring("ConfigInvalid => "));
        assert_that!(msg.as_str(), contains_substring("Context:"));
        assert_that!(msg.as_str(), contains_substring("precision: 3"));
    }

    #[test]
    fn test_kind_and_message() {
        let err = Error::unsupported_encoding_version(2, 1);
        assert_eq!(err.kind(), ErrorKind::UnsupportedEncodingVersion);
        assert_eq!(err.message(), "expected encoding version 2, got 1");
    }
}
