use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref NAME: Regex = Regex::new("^[A-Za-z][A-Za-z0-9_]*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid name `{0}`: must start with a letter followed by letters, digits or underscores")]
pub struct InvalidName(pub String);

/// Validates a metric or namespace name against `[A-Za-z][A-Za-z0-9_]*`.
pub fn validate_name(name: &str) -> Result<(), InvalidName> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(InvalidName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_metric_names() {
        for name in ["people", "disk_io", "T2", "a"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", "1up", "_hidden", "dotted.name", "with space", "dash-ed"] {
            assert!(validate_name(name).is_err(), "{name}");
        }
    }
}
