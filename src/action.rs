use serde::Deserialize;

/// Method name carrying a [`MenuAction`] in its params.
pub const ACTION_METHOD: &str = "action";

/// An action attached to a desktop menu item, tagged by its `type` field.
///
/// Tags this build does not know about decode as [`MenuAction::Unknown`] and are ignored, so a
/// menu written by a newer runner still loads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MenuAction {
    RefreshMenu,
    OpenUrl { url: String },
    #[serde(other)]
    Unknown,
}

impl MenuAction {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_known_actions() {
        assert_eq!(
            MenuAction::from_value(json!({ "type": "refresh-menu" })).unwrap(),
            MenuAction::RefreshMenu
        );
        assert_eq!(
            MenuAction::from_value(json!({ "type": "open-url", "url": "https://example.com" }))
                .unwrap(),
            MenuAction::OpenUrl {
                url: "https://example.com".to_string()
            }
        );
    }

    #[test]
    fn unknown_type_is_a_noop_variant() {
        assert_eq!(
            MenuAction::from_value(json!({ "type": "launch-rockets", "count": 3 })).unwrap(),
            MenuAction::Unknown
        );
    }

    #[test]
    fn missing_payload_for_known_type_is_an_error() {
        assert!(MenuAction::from_value(json!({ "type": "open-url" })).is_err());
        assert!(MenuAction::from_value(json!({ "url": "https://example.com" })).is_err());
    }
}
