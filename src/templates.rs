//! HTML views rendered with Tera
//!
//! Views are loaded once at startup from `views_dir`; a view named `index`
//! is the file `index{views_ext}`.

use serde::Serialize;
use std::path::Path;
use tera::{Context, Tera};

use crate::error::{AppError, AppResult};

pub struct Templates {
    tera: Tera,
    ext: String,
}

impl Templates {
    /// Load every `*{ext}` file under `dir`
    ///
    /// A missing directory is not fatal: the server still starts, and routes
    /// that need a view answer 500 until one is provided.
    pub fn load(dir: &Path, ext: &str) -> AppResult<Self> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Views directory not found; pages will not render");
            return Ok(Self {
                tera: Tera::default(),
                ext: ext.to_string(),
            });
        }

        let glob = format!("{}/**/*{}", dir.display(), ext);
        let tera = Tera::new(&glob).map_err(|source| AppError::Template {
            name: glob.clone(),
            source,
        })?;
        tracing::debug!(
            dir = %dir.display(),
            count = tera.get_template_names().count(),
            "Loaded views"
        );

        Ok(Self {
            tera,
            ext: ext.to_string(),
        })
    }

    /// Build from in-memory sources, keyed by view name (without extension)
    pub fn from_raw(views: &[(&str, &str)], ext: &str) -> AppResult<Self> {
        let mut tera = Tera::default();
        let named: Vec<(String, &str)> = views
            .iter()
            .map(|(name, source)| (format!("{}{}", name, ext), *source))
            .collect();
        tera.add_raw_templates(named.iter().map(|(n, s)| (n.as_str(), *s)))
            .map_err(|source| AppError::Template {
                name: "<raw>".to_string(),
                source,
            })?;
        Ok(Self {
            tera,
            ext: ext.to_string(),
        })
    }

    pub fn has_view(&self, name: &str) -> bool {
        let file = format!("{}{}", name, self.ext);
        self.tera.get_template_names().any(|n| n == file)
    }

    /// Render view `name` with a serializable context
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> AppResult<String> {
        let context = Context::from_serialize(data).map_err(|source| AppError::Template {
            name: name.to_string(),
            source,
        })?;
        self.tera
            .render(&format!("{}{}", name, self.ext), &context)
            .map_err(|source| AppError::Template {
                name: name.to_string(),
                source,
            })
    }
}
