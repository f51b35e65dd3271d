/// Legacy api timestamps, e.g. `2024-03-01T12:30:00`.
///
/// The bridge reports `"none"` for values it has never set, and some
/// firmware sends `null`. Both decode as `None`.
pub mod legacy_naive_opt {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.format(FORMAT).to_string()),
            None => serializer.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        Ok(s.and_then(|s| NaiveDateTime::parse_from_str(&s, FORMAT).ok()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Stamp {
        #[serde(with = "super::legacy_naive_opt", default)]
        at: Option<NaiveDateTime>,
    }

    #[test]
    fn none_and_null_are_absent() {
        let a: Stamp = serde_json::from_str(r#"{"at": "none"}"#).unwrap();
        let b: Stamp = serde_json::from_str(r#"{"at": null}"#).unwrap();
        let c: Stamp = serde_json::from_str("{}").unwrap();
        assert!(a.at.is_none());
        assert!(b.at.is_none());
        assert!(c.at.is_none());
    }

    #[test]
    fn parses_timestamp() {
        let s: Stamp = serde_json::from_str(r#"{"at": "2024-03-01T12:30:00"}"#).unwrap();
        assert_eq!(
            s.at.unwrap().format("%H:%M").to_string(),
            "12:30".to_string()
        );
    }
}
