use crate::error::{ExtractError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Value types the extraction service understands, spelled the way it expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "List[str]")]
    ListStr,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        FieldType::Str,
        FieldType::Int,
        FieldType::Float,
        FieldType::Bool,
        FieldType::ListStr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Str => "str",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::ListStr => "List[str]",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .or_else(|| match trimmed.to_ascii_lowercase().as_str() {
                "list" | "list_str" | "list[string]" => Some(FieldType::ListStr),
                "string" => Some(FieldType::Str),
                _ => None,
            })
            .ok_or_else(|| {
                ExtractError::Validation(format!(
                    "Unknown field type '{}'. Expected one of: str, int, float, bool, List[str]",
                    trimmed
                ))
            })
    }
}

/// One row of the schema builder. A freshly added field is blank and has no type yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub description: String,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: Some(field_type),
            description: description.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.field_type.is_some()
    }

    /// `[name, type, description]`, the triple the service parses.
    pub fn to_wire(&self) -> [String; 3] {
        [
            self.name.trim().to_string(),
            self.field_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
            self.description.clone(),
        ]
    }
}

/// Partial update applied by the schema builder.
#[derive(Debug, Clone, Default)]
pub struct FieldUpdate {
    pub name: Option<String>,
    pub field_type: Option<FieldType>,
    pub description: Option<String>,
}

/// Entry in a schema file: either `{name, type, description}` or `[name, type, description]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Triple(Vec<String>),
    Named {
        name: String,
        #[serde(rename = "type")]
        field_type: String,
        #[serde(default)]
        description: String,
    },
}

impl FieldSpec {
    fn into_field(self) -> Result<FieldDefinition> {
        let (name, field_type, description) = match self {
            FieldSpec::Named {
                name,
                field_type,
                description,
            } => (name, field_type, description),
            FieldSpec::Triple(parts) => {
                let mut it = parts.into_iter();
                let name = it.next().unwrap_or_default();
                let field_type = it.next().unwrap_or_default();
                (name, field_type, it.next().unwrap_or_default())
            }
        };
        let field_type = if field_type.trim().is_empty() {
            None
        } else {
            Some(field_type.parse()?)
        };
        Ok(FieldDefinition {
            name,
            field_type,
            description,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Wrapped { fields: Vec<FieldSpec> },
    Bare(Vec<FieldSpec>),
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\W").expect("static pattern"))
}

/// Column name the service derives from a field name: non-word characters become `_`,
/// and a leading digit gets a `_` prefix.
pub fn column_name(field_name: &str) -> String {
    let replaced = identifier_pattern().replace_all(field_name.trim(), "_");
    if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", replaced)
    } else {
        replaced.into_owned()
    }
}

/// Ordered list of fields submitted as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    /// Load fields from a YAML or JSON file (picked by extension, YAML otherwise).
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::Validation(format!("Schema file not found: {}", path.display()))
            } else {
                ExtractError::from(e)
            }
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let parsed: SchemaFile = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        let specs = match parsed {
            SchemaFile::Wrapped { fields } => fields,
            SchemaFile::Bare(fields) => fields,
        };
        let fields = specs
            .into_iter()
            .map(FieldSpec::into_field)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends a blank field and returns its index.
    pub fn add_field(&mut self) -> usize {
        self.fields.push(FieldDefinition::default());
        self.fields.len() - 1
    }

    pub fn push(&mut self, field: FieldDefinition) {
        self.fields.push(field);
    }

    pub fn update_field(&mut self, index: usize, update: FieldUpdate) -> Result<()> {
        let field = self.fields.get_mut(index).ok_or_else(|| {
            ExtractError::Validation(format!("No field at position {}", index + 1))
        })?;
        if let Some(name) = update.name {
            field.name = name;
        }
        if let Some(t) = update.field_type {
            field.field_type = Some(t);
        }
        if let Some(description) = update.description {
            field.description = description;
        }
        Ok(())
    }

    /// Removes the field at `index`. Out of range is a no-op (the row is already gone).
    pub fn delete_field(&mut self, index: usize) -> Option<FieldDefinition> {
        if index < self.fields.len() {
            Some(self.fields.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Checks everything the service would otherwise reject, before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(ExtractError::Validation(
                "Please add at least one field to the schema".to_string(),
            ));
        }
        if !self.fields.iter().all(FieldDefinition::is_complete) {
            return Err(ExtractError::Validation(
                "All fields must have a name and type".to_string(),
            ));
        }
        let mut seen: HashMap<String, &str> = HashMap::new();
        for field in &self.fields {
            let column = column_name(&field.name);
            if let Some(previous) = seen.insert(column.clone(), field.name.trim()) {
                return Err(ExtractError::Validation(format!(
                    "Fields '{}' and '{}' both map to column '{}'",
                    previous,
                    field.name.trim(),
                    column
                )));
            }
        }
        Ok(())
    }

    /// Columns the result records will carry, in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| column_name(&f.name)).collect()
    }

    pub fn to_wire(&self) -> Vec<[String; 3]> {
        self.fields.iter().map(FieldDefinition::to_wire).collect()
    }
}
