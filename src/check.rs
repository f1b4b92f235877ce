//! Argument category checks for dynamically typed kernel arguments.

use std::fmt;

use thiserror::Error;

use crate::accel::Arg;

/// The argument categories callers can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Int,
    Float,
    Text,
    /// Lists and native arrays alike.
    Array,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Int => "int",
            Category::Float => "float",
            Category::Text => "string",
            Category::Array => "array-like",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected {name} to be {expected}, got {found}")]
pub struct CheckError {
    pub name: String,
    pub expected: Category,
    pub found: Category,
}

/// Fail with a descriptive error unless `arg` belongs to `expected`.
pub fn check_type(expected: Category, name: &str, arg: &Arg) -> Result<(), CheckError> {
    let found = arg.category();
    if found == expected {
        Ok(())
    } else {
        Err(CheckError {
            name: name.to_string(),
            expected,
            found,
        })
    }
}
