use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the unix epoch.
///
/// Sparkplug timestamps are always millisecond valued.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Validate a group, node, device or host identifier.
///
/// Identifiers become topic segments, so MQTT wildcard and separator
/// characters are not allowed.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name string must not be empty".into());
    }
    for c in name.chars() {
        if matches!(c, '+' | '/' | '#') {
            return Err(format!(
                "name string {name} cannot contain '+', '/' or '#' characters"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_name("plant1").is_ok());
        assert!(validate_name("line-2_cell.3").is_ok());
    }

    #[test]
    fn rejects_topic_metacharacters() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a+b").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a#").is_err());
    }
}
