//! Utilities dealing with error handling in this crate.

use failure::Fail;

/// Errors produced by this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Errors originating from calls to `std::io::*`.
    #[fail(display = "IO Error - {}", _0)]
    IO(#[cause] std::io::Error),
    /// Errors reading or writing CSV records.
    #[fail(display = "CSV Error - {}", _0)]
    Csv(#[cause] csv::Error),
    /// Errors reading environment variables.
    #[fail(display = "Environment Variable Error - {}", _0)]
    EnvVar(#[cause] std::env::VarError),
    /// Errors parsing Glob patterns.
    #[fail(display = "Glob Error - {}", _0)]
    GlobPattern(#[cause] glob::PatternError),
    /// Errors interating over entries in a glob.
    #[fail(display = "Glob Error - {}", _0)]
    GlobIter(#[cause] glob::GlobError),
    /// Errors caused by parsing integers from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseInt(#[cause] std::num::ParseIntError),
    /// Errors caused by parsing counter values or timestamps.
    #[fail(display = "Parse Error - {}", _0)]
    ParseFloat(#[cause] std::num::ParseFloatError),
    /// Errors caused by failing to read a `&[u8]` to a `str`.
    #[fail(display = "Parse Error - {}", _0)]
    ParseUtf8(#[cause] std::str::Utf8Error),
    /// Errors caused by malformed metric formulas.
    #[fail(display = "Parse Error - {}", _0)]
    ParseMetricExpr(#[cause] pest::error::Error<crate::pmu::Rule>),
    /// A required input file does not exist.
    #[fail(display = "Missing input - {}", _0)]
    MissingInput(String),
    /// The event list contains mesh events but the `arm_cmn` PMU driver is not loaded.
    #[fail(
        display = "arm_cmn PMU driver isn't available but {} contains CMN events",
        _0
    )]
    DriverUnavailable(String),
    /// An external tool exited unsuccessfully.
    #[fail(display = "Tool failed - {}", _0)]
    ToolFailed(String),
    /// Only one and two socket systems are supported.
    #[fail(display = "Unsupported topology - {} socket(s)", _0)]
    UnsupportedTopology(usize),
    /// A metrics file contained a header but no samples.
    #[fail(display = "No samples in {}", _0)]
    NoSamples(String),
    /// A formula divided by zero.
    #[fail(display = "Divide by zero")]
    DivideByZero,
    /// A formula referenced a counter that is not part of the sampled columns.
    #[fail(display = "Unresolved counter - {}", _0)]
    UnresolvedCounter(String),
    /// A formula does not follow the arithmetic grammar.
    #[fail(display = "Invalid formula - {}", _0)]
    InvalidFormula(String),
    /// A formula evaluated to NaN or infinity.
    #[fail(display = "Formula result is not a finite number")]
    NonFinite,
}

impl Error {
    /// Errors that only affect a single metric cell.
    ///
    /// These are logged and replaced by a placeholder value instead of stopping the run.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DivideByZero
                | Error::UnresolvedCounter(_)
                | Error::NonFinite
                | Error::InvalidFormula(_)
                | Error::ParseFloat(_)
                | Error::ParseMetricExpr(_)
        )
    }
}

macro_rules! error_from {
    ($et: ty => $cet: expr) => {
        impl From<$et> for Error {
            #[inline]
            fn from(err: $et) -> Self {
                $cet(err)
            }
        }
    };
}

error_from!(std::io::Error => Error::IO);
error_from!(csv::Error => Error::Csv);
error_from!(std::env::VarError => Error::EnvVar);
error_from!(glob::PatternError => Error::GlobPattern);
error_from!(glob::GlobError => Error::GlobIter);
error_from!(std::num::ParseIntError => Error::ParseInt);
error_from!(std::num::ParseFloatError => Error::ParseFloat);
error_from!(std::str::Utf8Error => Error::ParseUtf8);
error_from!(pest::error::Error<crate::pmu::Rule> => Error::ParseMetricExpr);

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::DivideByZero.is_recoverable());
        assert!(Error::UnresolvedCounter("cycles".into()).is_recoverable());
        assert!(!Error::NoSamples("metrics.csv".into()).is_recoverable());
        assert!(!Error::UnsupportedTopology(4).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err: Error = "x".parse::<f64>().unwrap_err().into();
        assert!(format!("{}", err).starts_with("Parse Error"));
        assert_eq!(
            format!("{}", Error::UnsupportedTopology(4)),
            "Unsupported topology - 4 socket(s)"
        );
    }
}
