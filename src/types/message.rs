//! Message types
//!
//! Defines chat turn structures and roles.

use serde::{Deserialize, Serialize};

/// Role of a chat turn's author
///
/// Serialized as a lowercase string. Unknown role names are kept as
/// [`Role::Other`] rather than rejected; prompt building skips them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// System prompt
    System,
    /// Message from the user
    User,
    /// Message from the AI assistant
    Assistant,
    /// Any other role name
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(name) => name,
        }
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        match name {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => Role::Other(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Role::from(name.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// A single turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// The role of the turn's author
    pub role: Role,
    /// The content of the turn
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<Role>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = ChatTurn::user("Hello, world!");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Hello, world!");
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(Role::from("system"), Role::System);
        assert_eq!(Role::from("assistant"), Role::Assistant);
        assert_eq!(Role::from("tool"), Role::Other("tool".to_string()));
        // role names are case sensitive
        assert_eq!(Role::from("User"), Role::Other("User".to_string()));
    }

    #[test]
    fn test_turn_json_shape() {
        let json = serde_json::to_string(&ChatTurn::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);

        let turn: ChatTurn = serde_json::from_str(r#"{"role":"narrator","content":"x"}"#).unwrap();
        assert_eq!(turn.role, Role::Other("narrator".to_string()));
        assert_eq!(String::from(turn.role), "narrator");
    }
}
