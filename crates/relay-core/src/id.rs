use uuid::Uuid;

/// A session id failed validation before being interpolated into a
/// subprocess argument vector or window name.
#[derive(Debug, thiserror::Error)]
#[error("session id is not a canonical UUID v4")]
pub struct InvalidSessionId;

/// Rejects anything that is not the canonical 8-4-4-4-12 hex form of a
/// UUID v4. Callers must run this before a session id is concatenated into
/// a window name, a process argument, or a regex used for process probing.
pub fn validate_session_id(raw: &str) -> Result<Uuid, InvalidSessionId> {
    let id = Uuid::parse_str(raw).map_err(|_| InvalidSessionId)?;
    if id.get_version_num() != 4 {
        return Err(InvalidSessionId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_v4() {
        let id = Uuid::new_v4();
        assert_eq!(validate_session_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn rejects_non_uuid_text() {
        assert!(validate_session_id("not-a-uuid").is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(validate_session_id("abc; rm -rf /").is_err());
        assert!(validate_session_id("$(whoami)").is_err());
    }

    #[test]
    fn rejects_wrong_uuid_version() {
        // nil UUID is version 0, not 4.
        assert!(validate_session_id(&Uuid::nil().to_string()).is_err());
    }

    #[test]
    fn rejects_empty_string() {
        assert!(validate_session_id("").is_err());
    }
}
