//! Course and pathway metadata
//!
//! Two layers live here:
//! - **Definition documents** (`CourseDefinition`, `PathwayDefinition`): the
//!   JSON shape authored in the content store. Entries may be bare slugs or
//!   detailed objects.
//! - **Normalized metadata** (`CourseMetadata`, `PathwayMetadata`): ordered,
//!   validated, immutable once built. This is what the calculator consumes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One learning unit inside a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub slug: String,
    pub required: bool,
    pub order: i64,
}

impl ModuleRef {
    pub fn required(slug: impl Into<String>, order: i64) -> Self {
        Self {
            slug: slug.into(),
            required: true,
            order,
        }
    }

    pub fn optional(slug: impl Into<String>, order: i64) -> Self {
        Self {
            slug: slug.into(),
            required: false,
            order,
        }
    }
}

/// One course inside a pathway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub slug: String,
    pub required: bool,
    pub order: i64,
}

impl CourseRef {
    pub fn required(slug: impl Into<String>, order: i64) -> Self {
        Self {
            slug: slug.into(),
            required: true,
            order,
        }
    }

    pub fn optional(slug: impl Into<String>, order: i64) -> Self {
        Self {
            slug: slug.into(),
            required: false,
            order,
        }
    }
}

/// Normalized course definition
///
/// `modules` is sorted into canonical order and slugs are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseMetadata {
    slug: String,
    modules: Vec<ModuleRef>,
}

impl CourseMetadata {
    /// Build course metadata, sorting modules by `order` (stable) and
    /// rejecting empty or duplicate slugs.
    pub fn new(slug: impl Into<String>, mut modules: Vec<ModuleRef>) -> Result<Self> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(Error::Configuration("course with empty slug".to_string()));
        }

        let mut seen = HashSet::new();
        for module in &modules {
            if module.slug.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "course '{}' has a module with an empty slug",
                    slug
                )));
            }
            if !seen.insert(module.slug.as_str()) {
                return Err(Error::Configuration(format!(
                    "course '{}' lists module '{}' more than once",
                    slug, module.slug
                )));
            }
        }

        modules.sort_by_key(|m| m.order);
        Ok(Self { slug, modules })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Modules in canonical order
    pub fn modules(&self) -> &[ModuleRef] {
        &self.modules
    }

    pub fn required_modules(&self) -> impl Iterator<Item = &ModuleRef> {
        self.modules.iter().filter(|m| m.required)
    }
}

/// Normalized pathway definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathwayMetadata {
    slug: String,
    courses: Vec<CourseRef>,
}

impl PathwayMetadata {
    pub fn new(slug: impl Into<String>, mut courses: Vec<CourseRef>) -> Result<Self> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(Error::Configuration("pathway with empty slug".to_string()));
        }

        let mut seen = HashSet::new();
        for course in &courses {
            if course.slug.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "pathway '{}' has a course with an empty slug",
                    slug
                )));
            }
            if !seen.insert(course.slug.as_str()) {
                return Err(Error::Configuration(format!(
                    "pathway '{}' lists course '{}' more than once",
                    slug, course.slug
                )));
            }
        }

        courses.sort_by_key(|c| c.order);
        Ok(Self { slug, courses })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Courses in canonical order
    pub fn courses(&self) -> &[CourseRef] {
        &self.courses
    }

    pub fn required_courses(&self) -> impl Iterator<Item = &CourseRef> {
        self.courses.iter().filter(|c| c.required)
    }
}

// ============================================================================
// Definition documents
// ============================================================================

/// Entry in a definition's `modules` or `courses` list
///
/// A bare string is a required item ordered by its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryDefinition {
    Slug(String),
    Detailed {
        slug: String,
        #[serde(default = "default_required")]
        required: bool,
        #[serde(default)]
        order: Option<i64>,
    },
}

fn default_required() -> bool {
    true
}

impl EntryDefinition {
    /// Resolve into `(slug, required, order)`, defaulting order to position
    fn resolve(&self, position: usize) -> (String, bool, i64) {
        match self {
            EntryDefinition::Slug(slug) => (slug.clone(), true, position as i64),
            EntryDefinition::Detailed {
                slug,
                required,
                order,
            } => (slug.clone(), *required, order.unwrap_or(position as i64)),
        }
    }
}

/// Course document as authored in `content/courses/*.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseDefinition {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    pub modules: Vec<EntryDefinition>,
}

impl CourseDefinition {
    pub fn into_metadata(self) -> Result<CourseMetadata> {
        let modules = self
            .modules
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let (slug, required, order) = entry.resolve(position);
                ModuleRef {
                    slug,
                    required,
                    order,
                }
            })
            .collect();
        CourseMetadata::new(self.slug, modules)
    }
}

/// Pathway document as authored in `content/pathways/*.json`
///
/// Legacy pathways list `modules` directly and carry no `courses`; those are
/// not evaluable and are skipped by the cache loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathwayDefinition {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub courses: Option<Vec<EntryDefinition>>,
    #[serde(default)]
    pub modules: Option<Vec<EntryDefinition>>,
}

impl PathwayDefinition {
    pub fn is_legacy_module_pathway(&self) -> bool {
        self.courses.is_none() && self.modules.is_some()
    }

    pub fn into_metadata(self) -> Result<PathwayMetadata> {
        let entries = self.courses.ok_or_else(|| {
            Error::Configuration(format!("pathway '{}' has no courses list", self.slug))
        })?;
        let courses = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let (slug, required, order) = entry.resolve(position);
                CourseRef {
                    slug,
                    required,
                    order,
                }
            })
            .collect();
        PathwayMetadata::new(self.slug, courses)
    }
}
