/// A producer-declared event type. Must be instantiated with
/// `EventType::parse`, which enforces the grammar: non-empty, ASCII
/// alphanumerics plus `.`, `_` and `-`.
#[derive(Debug, Clone)]
pub struct EventType(String);

impl EventType {
    pub fn parse(value: String) -> Result<Self, String> {
        let valid_char =
            |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-';
        if value.is_empty() || !value.chars().all(valid_char) {
            return Err(format!("Invalid event type: {value:?}"));
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
