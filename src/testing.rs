//! Result comparison helpers for numeric tests.

use anyhow::{bail, Result};
use tracing::{info, warn};

/// Compare element-wise with relative tolerance `prec` and log the outcome.
///
/// Values within `prec` of each other in absolute terms also pass, so exact
/// zeros compare cleanly.
pub fn print_results(obtained: &[f64], expected: &[f64], text: &str, prec: f64) -> bool {
    if obtained.len() != expected.len() {
        warn!(
            test = text,
            obtained = obtained.len(),
            expected = expected.len(),
            "FAIL: length mismatch"
        );
        return false;
    }

    let mut passed = true;
    for (i, (a, b)) in obtained.iter().zip(expected).enumerate() {
        if !close(*a, *b, prec) {
            warn!(test = text, index = i, obtained = a, expected = b, "FAIL");
            passed = false;
        }
    }
    if passed {
        info!(test = text, "passed");
    }
    passed
}

/// Turn an accumulated pass flag into a test result.
pub fn conclude_test(passed: bool) -> Result<()> {
    if !passed {
        bail!("at least one comparison failed");
    }
    info!("All tests passed.");
    Ok(())
}

fn close(a: f64, b: f64, prec: f64) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    diff <= prec || diff <= prec * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_tolerance() {
        assert!(print_results(&[1e10], &[1e10 + 1.0], "big", 1e-9));
        assert!(!print_results(&[1.0], &[1.1], "small", 1e-9));
        assert!(print_results(&[0.0], &[1e-12], "zero", 1e-9));
    }

    #[test]
    fn test_length_mismatch_fails() {
        assert!(!print_results(&[1.0], &[1.0, 2.0], "len", 1e-9));
    }

    #[test]
    fn test_conclude() {
        assert!(conclude_test(true).is_ok());
        assert!(conclude_test(false).is_err());
    }
}
