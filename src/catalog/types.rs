// src/catalog/types.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One theme as described by the WordPress.org themes catalog.
///
/// The catalog is loose about types (numbers arrive as strings, `author` may be a
/// profile object, `parent` may be `false`), so the noisy fields go through lenient
/// deserializers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default, deserialize_with = "de_author")]
    pub author: String,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub rating: f64,
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub num_ratings: u64,
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub downloaded: u64,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "de_tags")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_parent",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent: Option<ParentTheme>,
    #[serde(default)]
    pub screenshot_url: String,
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub active_installs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentTheme {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub homepage: String,
}

/// Raw `query_themes` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    pub themes: Vec<CatalogEntry>,
}

impl CatalogEntry {
    /// Name of the throwaway site (directory, URL path, DB prefix source).
    pub fn instance_name(&self) -> String {
        format!("{}01", self.slug)
    }

    /// Table prefix for the shared test database; MySQL identifiers can't carry `.` or `-`.
    pub fn db_prefix(&self) -> String {
        format!("{}_", self.instance_name().replace(['.', '-'], ""))
    }

    /// Long description; `sections.description` wins over the top-level field.
    pub fn long_description(&self) -> &str {
        self.sections
            .get("description")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.description)
    }

    /// Download URL of the current version, looked up in the entry's own version map.
    pub fn download_link(&self) -> Option<&str> {
        self.versions.get(&self.version).map(String::as_str)
    }

    /// Catalog screenshots are protocol-relative (`//ts.w.org/...`).
    pub fn screenshot_source_url(&self) -> String {
        if self.screenshot_url.starts_with("//") {
            format!("http:{}", self.screenshot_url)
        } else {
            self.screenshot_url.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// lenient deserializers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Int(u64),
    Float(f64),
    Text(String),
}

fn de_u64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Option::<NumberLike>::deserialize(d)? {
        Some(NumberLike::Int(n)) => n,
        Some(NumberLike::Float(f)) if f.is_finite() && f >= 0.0 => f as u64,
        Some(NumberLike::Text(s)) => s.trim().replace(',', "").parse().unwrap_or(0),
        _ => 0,
    })
}

fn de_f64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Option::<NumberLike>::deserialize(d)? {
        Some(NumberLike::Int(n)) => n as f64,
        Some(NumberLike::Float(f)) => f,
        Some(NumberLike::Text(s)) => s.trim().parse().unwrap_or(0.0),
        None => 0.0,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorField {
    Name(String),
    Profile {
        #[serde(default)]
        display_name: String,
        #[serde(default)]
        user_nicename: String,
    },
}

fn de_author<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<AuthorField>::deserialize(d)? {
        Some(AuthorField::Name(n)) => n,
        Some(AuthorField::Profile {
            display_name,
            user_nicename,
        }) => {
            if display_name.is_empty() {
                user_nicename
            } else {
                display_name
            }
        }
        None => String::new(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagsField {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

fn de_tags<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
    Ok(match Option::<TagsField>::deserialize(d)? {
        Some(TagsField::Map(m)) => m,
        Some(TagsField::List(v)) => v.into_iter().map(|t| (t.clone(), t)).collect(),
        None => BTreeMap::new(),
    })
}

fn de_parent<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ParentTheme>, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(|v| serde_json::from_value::<ParentTheme>(v).ok()))
}
