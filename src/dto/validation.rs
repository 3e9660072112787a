//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted player id.
const PLAYER_ID_MAX_LEN: usize = 64;

/// Validates a player id: 1 to 64 characters of ASCII letters, digits, `-`, `_` or `:`.
///
/// # Examples
///
/// ```ignore
/// validate_player_id("player-0001") // Ok
/// validate_player_id("")            // Err - empty
/// validate_player_id("bad id")      // Err - space
/// ```
pub fn validate_player_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > PLAYER_ID_MAX_LEN {
        let mut err = ValidationError::new("player_id_length");
        err.message = Some(
            format!(
                "Player ID must be between 1 and {PLAYER_ID_MAX_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
    {
        let mut err = ValidationError::new("player_id_format");
        err.message =
            Some("Player ID may only contain ASCII letters, digits, '-', '_' or ':'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a damage batch: at least one hit and no negative amounts.
///
/// Upper bounds come from configuration and are enforced by the coordinator.
pub fn validate_raw_hits(amounts: &[i64]) -> Result<(), ValidationError> {
    if amounts.is_empty() {
        let mut err = ValidationError::new("damage_batch_empty");
        err.message = Some("Damage batch must contain at least one hit".into());
        return Err(err);
    }

    if let Some(negative) = amounts.iter().find(|amount| **amount < 0) {
        let mut err = ValidationError::new("damage_negative");
        err.message = Some(format!("Damage amounts cannot be negative (got {negative})").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_player_id_valid() {
        assert!(validate_player_id("player-0001").is_ok());
        assert!(validate_player_id("guild:alpha_7").is_ok());
        assert!(validate_player_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_player_id_invalid_length() {
        assert!(validate_player_id("").is_err());
        assert!(validate_player_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_player_id_invalid_format() {
        assert!(validate_player_id("bad id").is_err());
        assert!(validate_player_id("émile").is_err());
        assert!(validate_player_id("a/b").is_err());
    }

    #[test]
    fn test_validate_raw_hits() {
        assert!(validate_raw_hits(&[0, 10, 1_000_000]).is_ok());
        assert!(validate_raw_hits(&[]).is_err());
        assert!(validate_raw_hits(&[10, -1]).is_err());
    }
}
