use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity record returned by the profile endpoint.
///
/// The shape is owned by the service, so the record is kept as a JSON
/// object and only read through the accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Map<String, Value>);

impl UserProfile {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of `field`, skipping blanks
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn email(&self) -> Option<&str> {
        self.str_field("email")
    }

    /// Best human-readable name: `name`, then first + last name,
    /// then `username`, then `email`.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.str_field("name") {
            return name.to_string();
        }

        let full_name = [self.str_field("first_name"), self.str_field("last_name")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !full_name.is_empty() {
            return full_name;
        }

        self.str_field("username")
            .or_else(|| self.email())
            .unwrap_or("unknown user")
            .to_string()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for UserProfile {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
