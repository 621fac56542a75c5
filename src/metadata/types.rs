use serde::{Deserialize, Serialize};

/// Response of the metadata query service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "group_list", default)]
    pub groups: Vec<SearchGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchGroup {
    #[serde(rename = "record_list", default)]
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
}

impl Field {
    fn is(&self, name: &str) -> bool {
        self.name == name || self.kind == name
    }
}

impl Record {
    /// Value of the first field called `name` (by name or type), if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.is(name)).map(|f| f.value.as_str())
    }

    /// Every value of fields called `name`.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.is(name))
            .map(|f| f.value.as_str())
    }
}
