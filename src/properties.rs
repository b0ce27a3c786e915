use serde_json::{Map, Value};

/// Type alias for a JSON object holding key-value pairs that decorate an
/// event or a profile.
///
/// Values are [`serde_json::Value`], so a property can hold any JSON type.
/// Keys are serialized in sorted order, which keeps encoded payloads
/// deterministic.
///
/// # Examples
/// ```
/// # use mixpanel::Properties;
/// let mut properties = Properties::new();
/// properties.insert("plan".to_owned(), "pro".into());
/// properties.insert("seats".to_owned(), 5.into());
/// ```
pub type Properties = Map<String, Value>;
