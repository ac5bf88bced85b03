use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Prefix that distinguishes seller identities on the wire
/// (registration frames and the `X-Identity` header).
const SELLER_PREFIX: &str = "seller_";

/// Which side of the marketplace a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Seller,
}

impl Role {
    /// The counterpart role in a buyer/seller conversation.
    pub fn opposite(self) -> Role {
        match self {
            Role::User => Role::Seller,
            Role::Seller => Role::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Seller => "seller",
        }
    }
}

/// A role-scoped participant identity.
///
/// On the wire this is a bare string: `seller_<id>` for sellers,
/// `<id>` for buyers. The same identity is the key for the connection
/// registry, the presence store and the unseen counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub role: Role,
    pub id: String,
}

impl Identity {
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }

    /// Parse a registration string (`seller_42` / `42`).
    ///
    /// Returns `None` for empty ids or ids containing whitespace —
    /// those cannot be valid registry keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (role, id) = match raw.strip_prefix(SELLER_PREFIX) {
            Some(id) => (Role::Seller, id),
            None => (Role::User, raw),
        };
        if id.is_empty() || id.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(role, id))
    }

    /// Redis key recording this identity's liveness: `online:<role>:<id>`.
    pub fn presence_key(&self) -> String {
        format!("online:{}:{}", self.role.as_str(), self.id)
    }

    /// Redis key for this identity's unseen count in one conversation.
    pub fn unseen_key(&self, conversation_id: &str) -> String {
        format!(
            "unseen:{}:{}:{}",
            self.role.as_str(),
            self.id,
            conversation_id
        )
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::User => write!(f, "{}", self.id),
            Role::Seller => write!(f, "{}{}", SELLER_PREFIX, self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seller_prefix() {
        let identity = Identity::parse("seller_42").unwrap();
        assert_eq!(identity.role, Role::Seller);
        assert_eq!(identity.id, "42");
    }

    #[test]
    fn parses_bare_id_as_user() {
        let identity = Identity::parse("7").unwrap();
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.id, "7");
    }

    #[test]
    fn rejects_empty_and_whitespace_ids() {
        assert!(Identity::parse("").is_none());
        assert!(Identity::parse("seller_").is_none());
        assert!(Identity::parse("a b").is_none());
        assert!(Identity::parse("   ").is_none());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["seller_42", "7"] {
            let identity = Identity::parse(raw).unwrap();
            assert_eq!(identity.to_string(), raw);
            assert_eq!(Identity::parse(&identity.to_string()).unwrap(), identity);
        }
    }

    #[test]
    fn opposite_role_flips() {
        assert_eq!(Role::User.opposite(), Role::Seller);
        assert_eq!(Role::Seller.opposite(), Role::User);
    }

    #[test]
    fn redis_keys_are_role_scoped() {
        let seller = Identity::new(Role::Seller, "2");
        assert_eq!(seller.presence_key(), "online:seller:2");
        assert_eq!(seller.unseen_key("c1"), "unseen:seller:2:c1");
    }
}
