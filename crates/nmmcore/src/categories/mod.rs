//! Categories for organizing mods.
//!
//! A category is a display name plus a `#RRGGBB` color. Names are unique
//! case-insensitively; mods reference categories by name.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single category definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub color: String,
}

impl Category {
    pub fn new(name: &str, color: &str) -> Self {
        Category {
            name: name.trim().to_string(),
            color: color.to_string(),
        }
    }
}

/// Starter categories for a fresh config.
pub fn defaults() -> Vec<Category> {
    vec![
        Category::new("Weapons", "#FF5733"),
        Category::new("Armor", "#33FF57"),
        Category::new("Cosmetic", "#3357FF"),
    ]
}

/// Whether `color` is a `#RRGGBB` hex color.
pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Check names are non-empty and unique, and colors are well formed.
pub fn validate(categories: &[Category]) -> Result<()> {
    for (idx, category) in categories.iter().enumerate() {
        if category.name.trim().is_empty() {
            return Err(Error::InvalidCategory("category name is empty".into()));
        }
        if !is_valid_color(&category.color) {
            return Err(Error::InvalidCategory(format!(
                "\"{}\" has invalid color {:?}",
                category.name, category.color
            )));
        }
        if categories[..idx]
            .iter()
            .any(|other| other.name.eq_ignore_ascii_case(&category.name))
        {
            return Err(Error::InvalidCategory(format!(
                "duplicate category \"{}\"",
                category.name
            )));
        }
    }
    Ok(())
}

/// Find a category by name (case-insensitive).
pub fn find<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
    categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
}

/// Add a category, rejecting duplicates and bad colors.
pub fn add(categories: &mut Vec<Category>, category: Category) -> Result<()> {
    let mut candidate = categories.clone();
    candidate.push(category);
    validate(&candidate)?;
    *categories = candidate;
    Ok(())
}

/// Remove a category by name. Returns whether anything was removed.
pub fn remove(categories: &mut Vec<Category>, name: &str) -> bool {
    let before = categories.len();
    categories.retain(|c| !c.name.eq_ignore_ascii_case(name.trim()));
    categories.len() != before
}

/// Change a category's color.
pub fn recolor(categories: &mut [Category], name: &str, color: &str) -> Result<()> {
    if !is_valid_color(color) {
        return Err(Error::InvalidCategory(format!("invalid color {color:?}")));
    }
    let category = categories
        .iter_mut()
        .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| Error::InvalidCategory(format!("no category named \"{name}\"")))?;
    category.color = color.to_string();
    Ok(())
}
