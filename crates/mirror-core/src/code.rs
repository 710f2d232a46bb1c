//! Dotted taxonomy codes (`4.3.2.2.1`), their categories, and the
//! name ordering used when listing coded folders.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("Empty code")]
    Empty,

    #[error("Invalid component {component:?} in code {code:?}")]
    InvalidComponent { code: String, component: String },

    #[error("Component {component:?} in code {code:?} has a leading zero")]
    LeadingZero { code: String, component: String },
}

/// One code component: decimal digits without leading zeros, of any length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Component(String);

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        // Canonical digits: the longer one is the larger number
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A non-empty sequence of non-negative integers separated by `.`.
///
/// Components are kept as written, which rules out leading zeros: `4.03`
/// is rejected rather than silently turned into `4.3`. Ordering is
/// element-wise numeric; a prefix sorts before its extensions, so
/// `1.1 < 1.2 < 1.10 < 2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DottedCode(Vec<Component>);

impl DottedCode {
    pub fn parts(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(|c| c.0.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The leading component, which selects the element folder and category.
    pub fn element(&self) -> &str {
        &self.0[0].0
    }

    pub fn category(&self) -> Category {
        Category::for_element(self.element())
    }

    /// The first `len` components. `len` is clamped to `1..=self.len()`.
    pub fn prefix(&self, len: usize) -> DottedCode {
        let len = len.clamp(1, self.0.len());
        DottedCode(self.0[..len].to_vec())
    }

    /// Proper prefixes of length 2 up to `len - 1`: `4.3`, `4.3.2`, `4.3.2.2` for `4.3.2.2.1`.
    pub fn intermediate_prefixes(&self) -> impl Iterator<Item = DottedCode> + '_ {
        (2..self.0.len()).map(|len| self.prefix(len))
    }
}

impl FromStr for DottedCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        let parts = trimmed
            .split('.')
            .map(|component| {
                if component.is_empty() || !component.chars().all(|c| c.is_ascii_digit()) {
                    return Err(CodeError::InvalidComponent {
                        code: trimmed.to_string(),
                        component: component.to_string(),
                    });
                }
                if component.len() > 1 && component.starts_with('0') {
                    return Err(CodeError::LeadingZero {
                        code: trimmed.to_string(),
                        component: component.to_string(),
                    });
                }
                Ok(Component(component.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DottedCode(parts))
    }
}

impl fmt::Display for DottedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&part.0)?;
        }
        Ok(())
    }
}

/// Task category derived from the leading code component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    #[serde(rename = "Core Documents")]
    CoreDocuments,
    #[serde(rename = "Management")]
    Management,
    #[serde(rename = "Safety Signs")]
    SafetySigns,
    #[serde(rename = "HSE Facilities")]
    HseFacilities,
    #[serde(rename = "Safety Committee")]
    SafetyCommittee,
    #[serde(rename = "Inspection")]
    Inspection,
    #[serde(rename = "Security")]
    Security,
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    pub fn for_element(element: &str) -> Self {
        match element {
            "0" => Category::CoreDocuments,
            "1" => Category::Management,
            "2" => Category::SafetySigns,
            "3" => Category::HseFacilities,
            "4" => Category::SafetyCommittee,
            "5" => Category::Inspection,
            "6" => Category::Security,
            _ => Category::Other,
        }
    }

    /// Category for a raw code string such as `"4.1"`; unparseable leads map to `Other`.
    pub fn for_code_str(code: &str) -> Self {
        code.split('.')
            .next()
            .map(|lead| Self::for_element(lead.trim()))
            .unwrap_or(Category::Other)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::CoreDocuments => "Core Documents",
            Category::Management => "Management",
            Category::SafetySigns => "Safety Signs",
            Category::HseFacilities => "HSE Facilities",
            Category::SafetyCommittee => "Safety Committee",
            Category::Inspection => "Inspection",
            Category::Security => "Security",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Keep alphanumerics, `.`, `_`, `-` and spaces; drop everything else.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Heuristic for folder-name code candidates: at least one digit and one `.`.
pub fn looks_like_code(candidate: &str) -> bool {
    candidate.contains('.') && candidate.chars().any(|c| c.is_ascii_digit())
}

/// The dotted code at the start of a folder name (`"1.10 B"` -> `1.10`), if any.
pub fn leading_code(name: &str) -> Option<DottedCode> {
    name.split_whitespace().next()?.parse().ok()
}

/// Numeric-aware folder name ordering.
///
/// Names with a leading dotted code sort by that code (then by full name);
/// they come before names without one, which sort lexicographically.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    match (leading_code(a), leading_code(b)) {
        (Some(ca), Some(cb)) => ca.cmp(&cb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
