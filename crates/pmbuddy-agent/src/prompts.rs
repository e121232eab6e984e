use std::path::Path;

use tracing::debug;

use pmbuddy_core::error::{PmBuddyError, Result};

/// Load `<dir>/<name>.prompt`.
pub fn load_prompt(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(format!("{}.prompt", name));
    if !path.is_file() {
        return Err(PmBuddyError::PromptNotFound(path.display().to_string()));
    }
    let template = std::fs::read_to_string(&path)?;
    debug!(prompt = %name, bytes = template.len(), "Loaded prompt template");
    Ok(template)
}
