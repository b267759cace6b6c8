//! Uniform success/failure wrapper handed to presentation layers.

use serde::Serialize;
use std::fmt::Display;

/// Result of a user-facing operation: a flag, a human-readable message and,
/// on success only, a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome<T> {
    pub ok: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Outcome<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn success_with(data: T, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_bad(&self) -> bool {
        !self.ok
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            ok: self.ok,
            message: self.message,
            data: self.data.map(f),
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_carries_data() {
        let outcome = Outcome::success(3);
        assert!(outcome.ok);
        assert!(!outcome.is_bad());
        assert_eq!(outcome.data, Some(3));
        assert_eq!(outcome.message, None);
    }

    #[test]
    fn failure_has_no_data() {
        let outcome: Outcome<u32> = Outcome::failure("passfile 4 not found");
        assert!(outcome.is_bad());
        assert_eq!(outcome.data, None);
        assert_eq!(outcome.message.as_deref(), Some("passfile 4 not found"));
    }

    #[test]
    fn converts_from_result() {
        let ok: Outcome<&str> = Ok::<_, std::io::Error>("done").into();
        assert_eq!(ok, Outcome::success("done"));

        let err: Outcome<()> = Err::<(), _>("disk full").into();
        assert!(err.is_bad());
        assert_eq!(err.message.as_deref(), Some("disk full"));
    }

    #[test]
    fn map_keeps_message() {
        let outcome = Outcome::success_with(2, "merged").map(|n| n * 10);
        assert_eq!(outcome.data, Some(20));
        assert_eq!(outcome.message.as_deref(), Some("merged"));
    }

    #[test]
    fn serializes_flat() {
        let json = serde_json::to_value(Outcome::<u8>::failure("bad")).unwrap();
        assert_eq!(json, serde_json::json!({"ok": false, "message": "bad", "data": null}));
    }
}
