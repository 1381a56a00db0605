// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::join::ErrorCode;

#[derive(Debug)]
pub enum ErrorKind {
    DataStoreError(data_store::error::Error),
    IntegerOverflow(String),
    InvalidArgument(String),
    KernelError { code: ErrorCode, message: String },
    LayoutMismatch(String),
    SimtRuntimeError(simt_runtime::error::Error),
    Msg(String),
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.kind, f)
    }
}

impl From<data_store::error::Error> for Error {
    fn from(error: data_store::error::Error) -> Self {
        Self {
            kind: ErrorKind::DataStoreError(error),
        }
    }
}

impl From<simt_runtime::error::Error> for Error {
    fn from(error: simt_runtime::error::Error) -> Self {
        Self {
            kind: ErrorKind::SimtRuntimeError(error),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::DataStoreError(ref e) => e.fmt(f),
            ErrorKind::IntegerOverflow(ref s) => write!(f, "IntegerOverflow: {}", s),
            ErrorKind::InvalidArgument(ref s) => write!(f, "InvalidArgument: {}", s),
            ErrorKind::KernelError {
                ref code,
                ref message,
            } => write!(f, "KernelError: {:?}: {}", code, message),
            ErrorKind::LayoutMismatch(ref s) => write!(f, "LayoutMismatch: {}", s),
            ErrorKind::SimtRuntimeError(ref e) => e.fmt(f),
            ErrorKind::Msg(ref s) => write!(f, "Msg: {}", s),
        }
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        ErrorKind::Msg(s)
    }
}

impl<'a> From<&'a str> for ErrorKind {
    fn from(s: &'a str) -> Self {
        ErrorKind::Msg(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
