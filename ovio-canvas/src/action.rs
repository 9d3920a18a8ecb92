use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::component::Properties;

/// Backend behaviour that can be attached to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ApiCall,
    DbInsert,
    DbQuery,
    Navigate,
    ShowAlert,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::ApiCall,
        ActionType::DbInsert,
        ActionType::DbQuery,
        ActionType::Navigate,
        ActionType::ShowAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ApiCall => "api_call",
            ActionType::DbInsert => "db_insert",
            ActionType::DbQuery => "db_query",
            ActionType::Navigate => "navigate",
            ActionType::ShowAlert => "show_alert",
        }
    }

    /// Config keys the editor offers for this action type.
    ///
    /// Keys outside this list are kept as-is; the backend ignores them.
    pub fn config_keys(&self) -> &'static [&'static str] {
        match self {
            ActionType::ApiCall => &["method", "endpoint", "headers", "body"],
            ActionType::DbInsert => &["table", "data"],
            ActionType::DbQuery => &["table", "filter", "orderBy"],
            ActionType::Navigate => &["url", "newTab"],
            ActionType::ShowAlert => &["message", "alertType"],
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown action type: {s}"))
    }
}

/// An action attached to a placed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: Properties,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id: id.into(),
            action_type,
            config: Properties::new(),
        }
    }

    /// Keys set in `config` that the action type does not define.
    pub fn unknown_config_keys(&self) -> Vec<&str> {
        let known = self.action_type.config_keys();
        self.config
            .keys()
            .map(String::as_str)
            .filter(|k| !known.contains(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_wire_shape() {
        let raw = json!({
            "id": "action-Pab12cd",
            "type": "show_alert",
            "config": {"message": "Saved!"}
        });
        let action: Action = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(action.action_type, ActionType::ShowAlert);
        assert_eq!(serde_json::to_value(&action).unwrap(), raw);
    }

    #[test]
    fn test_config_defaults_to_empty() {
        let action: Action = serde_json::from_value(json!({"id": "a", "type": "navigate"})).unwrap();
        assert!(action.config.is_empty());
    }

    #[test]
    fn test_unknown_config_keys() {
        let mut action = Action::new("a", ActionType::DbQuery);
        action.config.insert("table".into(), json!("orders"));
        action.config.insert("limit".into(), json!(10));
        assert_eq!(action.unknown_config_keys(), vec!["limit"]);
    }

    #[test]
    fn test_parse_action_type() {
        assert_eq!("api_call".parse::<ActionType>().unwrap(), ActionType::ApiCall);
        assert!("webhook".parse::<ActionType>().is_err());
    }
}
