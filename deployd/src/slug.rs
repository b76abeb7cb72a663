//! Build key resolution
//!
//! A build key doubles as the application slug, the image tag, the swarm
//! service name and the log room name, so it must satisfy all four.

use crate::errors::PipelineError;

/// Swarm service names are limited to 63 characters
pub const MAX_KEY_LEN: usize = 63;

/// Derive the build key for an application name.
///
/// Transliterates to ASCII, lowercases, and joins the remaining runs of
/// letters and digits with `-` (`"Café App"` -> `"cafe-app"`, `"Bob's App"`
/// -> `"bob-s-app"`). Keys longer than [`MAX_KEY_LEN`] are cut without
/// leaving a trailing dash.
pub fn resolve(name: &str) -> Result<String, PipelineError> {
    let mut key = ::slug::slugify(name);

    if key.len() > MAX_KEY_LEN {
        key.truncate(MAX_KEY_LEN);
        while key.ends_with('-') {
            key.pop();
        }
    }

    if key.is_empty() {
        return Err(PipelineError::Validation(format!(
            "name '{}' does not contain any letters or digits",
            name
        )));
    }

    Ok(key)
}
