//! Failure injection hooks (feature: `failpoints`).
//!
//! Without the feature the macro expands to nothing. With it, a named point
//! fails when it has been armed with [`arm`] or listed in the comma-separated
//! `BATCHPLAN_FAILPOINTS` environment variable. The enclosing function must
//! return `Result<_, E>` with `E: From<String>`.

#[cfg(feature = "failpoints")]
static ARMED: parking_lot::Mutex<std::collections::BTreeSet<String>> =
    parking_lot::const_mutex(std::collections::BTreeSet::new());

/// Arm a named failpoint for the rest of the process (or until [`disarm`]).
#[cfg(feature = "failpoints")]
pub fn arm(name: &str) {
    ARMED.lock().insert(name.to_string());
}

#[cfg(feature = "failpoints")]
pub fn disarm(name: &str) {
    ARMED.lock().remove(name);
}

#[cfg(feature = "failpoints")]
pub fn is_armed(name: &str) -> bool {
    if ARMED.lock().contains(name) {
        return true;
    }
    std::env::var("BATCHPLAN_FAILPOINTS")
        .map(|v| v.split(',').any(|p| p.trim() == name))
        .unwrap_or(false)
}

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        if $crate::failpoints::is_armed($name) {
            return Err(format!("failpoint triggered: {}", $name).into());
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        let _ = $name;
    };
}

#[cfg(all(test, feature = "failpoints"))]
mod tests {
    use super::*;

    fn guarded() -> Result<(), String> {
        crate::fail_point!("failpoints_unit");
        Ok(())
    }

    #[test]
    fn armed_points_fail_until_disarmed() {
        assert!(guarded().is_ok());
        arm("failpoints_unit");
        assert_eq!(
            guarded().unwrap_err(),
            "failpoint triggered: failpoints_unit"
        );
        disarm("failpoints_unit");
        assert!(guarded().is_ok());
    }
}
