//! Persona template rendering.
//!
//! The system persona is a template with `{{name}}` placeholders filled
//! from the turn's named variables (system description, current date, and
//! so on). Rendering is the one stage of assembly that must succeed: a
//! placeholder with no value is an error, not a silent blank.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A persona template with `{{name}}` placeholders.
#[derive(Debug, Clone)]
pub struct PersonaTemplate {
    template: String,
}

impl PersonaTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template against the given variables.
    ///
    /// Placeholder names may contain letters, digits, underscores, and
    /// dashes. An unresolved placeholder fails the render.
    pub fn render(&self, vars: &BTreeMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(Error::Persona(format!(
                    "unterminated placeholder near offset {start}"
                )));
            };
            let name = after[..end].trim();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(Error::Persona(format!("invalid placeholder '{{{{{name}}}}}'")));
            }
            match vars.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(Error::Persona(format!(
                        "no value for placeholder '{{{{{name}}}}}'"
                    )));
                }
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
