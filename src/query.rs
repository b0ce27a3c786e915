use chrono::{DateTime, Utc};
use serde::Serialize;

/// Filter for [`ExportClient::list_profiles`](crate::ExportClient::list_profiles).
///
/// All fields are optional; the default query matches every profile and
/// returns all of its properties.
///
/// # Examples
/// ```
/// # use mixpanel::ProfileQuery;
/// let query = ProfileQuery {
///     output_properties: Some(vec!["$name".to_owned()]),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileQuery {
    /// Only match profiles last seen after this time.
    pub last_seen_after: Option<DateTime<Utc>>,
    /// Only match profiles last seen before this time.
    pub last_seen_before: Option<DateTime<Utc>>,
    /// Restrict which properties the server returns per profile. `None`
    /// returns all properties; an empty list is sent as an explicitly empty
    /// restriction. Does not affect which profiles match.
    pub output_properties: Option<Vec<String>>,
}

impl ProfileQuery {
    /// Render the time bounds into the export API's `where` expression
    /// language. Returns `None` when no bound is set, in which case no
    /// `where` parameter should be sent.
    pub(crate) fn where_expression(&self) -> Option<String> {
        let mut clauses = Vec::new();

        if let Some(before) = self.last_seen_before {
            clauses.push(format!(
                r#"properties["$last_seen"] < datetime({})"#,
                before.timestamp()
            ));
        }

        if let Some(after) = self.last_seen_after {
            clauses.push(format!(
                r#"properties["$last_seen"] > datetime({})"#,
                after.timestamp()
            ));
        }

        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(format!("({})", clauses.join(" && "))),
        }
    }
}

/// Render property names into the export API's array-literal syntax,
/// e.g. `["$name", "$email"]`.
pub(crate) fn format_output_properties(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| quote(name)).collect();
    format!("[{}]", quoted.join(", "))
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\\\""))
}
