use serde::Serialize;
use uuid::{Uuid, uuid};

/// Classification that decides whether a recipient's opt-out can suppress
/// delivery. Transactional mail is exempt from suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationCategory {
    pub id: Uuid,
    pub name: &'static str,
    pub can_disable: bool,
}

const TRANSACTIONAL: NotificationCategory = NotificationCategory {
    id: uuid!("6d66e807-67f3-4571-9d4d-79f77a526a75"),
    name: "Transactional",
    can_disable: false,
};

const MARKETING: NotificationCategory = NotificationCategory {
    id: uuid!("4d3a1e13-47b2-4a0e-bfbe-1f4c38e01e25"),
    name: "Marketing",
    can_disable: true,
};

pub fn list() -> &'static [NotificationCategory] {
    &[TRANSACTIONAL, MARKETING]
}

pub fn by_name(name: &str) -> Option<&'static NotificationCategory> {
    list().iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn by_id(id: Uuid) -> Option<&'static NotificationCategory> {
    list().iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactional_cannot_be_disabled() {
        let category = by_name("Transactional").unwrap();
        assert!(!category.can_disable);
        assert!(by_name("Marketing").unwrap().can_disable);
    }

    #[test]
    fn lookup_is_case_insensitive_by_name_and_exact_by_id() {
        let category = by_name("transactional").unwrap();
        assert_eq!(by_id(category.id).unwrap().name, "Transactional");
        assert!(by_name("Digest").is_none());
        assert!(by_id(Uuid::new_v4()).is_none());
    }
}
