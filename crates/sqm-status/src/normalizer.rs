//! Status normalizer.
//!
//! Persisted rows may carry legacy or corrupted status strings written before
//! the vocabulary was closed (or through a path that bypassed validation).
//! [`normalize`] maps any such value onto the vocabulary so downstream logic
//! never sees an invalid status. Unrecognized input falls back to `waiting`
//! and is reported through a `warn!` event carrying the raw value, so
//! operators can trace upstream corruption.
//!
//! Externally supplied target statuses go through [`parse_requested`]
//! instead: the same matching rules, but an unrecognized value is rejected
//! rather than silently turned into `waiting`.

use tracing::warn;

use crate::vocabulary::{QueueStatus, StatusParseError};

/// Outcome of normalizing a raw status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    pub status: QueueStatus,
    /// `true` when the raw value was missing or unrecognized and `waiting`
    /// was substituted.
    pub was_fallback: bool,
}

/// Normalize a raw status value. Never fails.
pub fn normalize(raw: Option<&str>) -> Normalized {
    if let Some(status) = raw.and_then(QueueStatus::match_folded) {
        return Normalized {
            status,
            was_fallback: false,
        };
    }

    warn!(
        raw = ?raw,
        fallback = %QueueStatus::Waiting,
        "unrecognized queue status; substituting fallback"
    );
    Normalized {
        status: QueueStatus::Waiting,
        was_fallback: true,
    }
}

/// Parse a caller-supplied target status at the input boundary.
///
/// Accepts mixed case and surrounding whitespace. Anything [`normalize`]
/// would fall back on is an error here.
pub fn parse_requested(raw: &str) -> Result<QueueStatus, StatusParseError> {
    QueueStatus::match_folded(raw).ok_or_else(|| StatusParseError {
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    const SAMPLES: &[Option<&str>] = &[
        None,
        Some(""),
        Some("   "),
        Some("waiting"),
        Some("  Serving "),
        Some("PROCESSING"),
        Some("completed\n"),
        Some("cancelled"),
        Some("canceled"),
        Some("in_progress"),
        Some("done"),
        Some("wait ing"),
        Some("0"),
    ];

    #[test]
    fn members_pass_through_unchanged() {
        for s in QueueStatus::ALL {
            let n = normalize(Some(s.as_str()));
            assert_eq!(n.status, s);
            assert!(!n.was_fallback);
        }
    }

    #[test]
    fn mixed_case_and_whitespace_are_accepted() {
        let n = normalize(Some("  Serving "));
        assert_eq!(n.status, QueueStatus::Serving);
        assert!(!n.was_fallback);
    }

    #[test]
    fn missing_blank_and_unknown_fall_back_to_waiting() {
        for raw in [None, Some(""), Some("  \t"), Some("in_progress"), Some("canceled")] {
            let n = normalize(raw);
            assert_eq!(n.status, QueueStatus::Waiting, "raw={raw:?}");
            assert!(n.was_fallback, "raw={raw:?}");
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in SAMPLES {
            let once = normalize(*raw).status;
            let twice = normalize(Some(once.as_str())).status;
            assert_eq!(once, twice, "raw={raw:?}");
        }
    }

    #[test]
    fn boundary_parse_rejects_what_normalize_would_substitute() {
        for raw in SAMPLES.iter().flatten() {
            let n = normalize(Some(*raw));
            match parse_requested(raw) {
                Ok(s) => {
                    assert!(!n.was_fallback);
                    assert_eq!(s, n.status);
                }
                Err(e) => {
                    assert!(n.was_fallback);
                    assert_eq!(e.raw, *raw);
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logs_of(f: impl FnOnce()) -> String {
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn fallback_warns_with_the_raw_value() {
        let out = logs_of(|| {
            assert!(normalize(Some("On_Hold")).was_fallback);
        });
        assert!(out.contains("WARN"), "{out}");
        assert!(out.contains("On_Hold"), "{out}");
        assert!(out.contains("waiting"), "{out}");
    }

    #[test]
    fn members_log_nothing() {
        let out = logs_of(|| {
            assert!(!normalize(Some("serving")).was_fallback);
        });
        assert!(out.is_empty(), "{out}");
    }
}
