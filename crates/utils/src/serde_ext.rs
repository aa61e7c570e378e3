use serde::{Deserialize, Deserializer};

/// Deserializer for PATCH fields where "absent" and "explicit null" mean
/// different things. Use together with `#[serde(default)]`:
/// missing field -> `None`, `null` -> `Some(None)`, value -> `Some(Some(v))`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "super::double_option")]
        email: Option<Option<String>>,
    }

    #[test]
    fn distinguishes_absent_null_and_value() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.email, None);

        let null: Patch = serde_json::from_str(r#"{"email":null}"#).unwrap();
        assert_eq!(null.email, Some(None));

        let set: Patch = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(set.email, Some(Some("a@b.c".to_string())));
    }
}
