use crate::error::AppError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Supplies the directory that relative working folders are anchored to.
pub trait RootResolver: Send + Sync {
    fn resolve_root(&self) -> PathBuf;
}

/// Expands tilde (~) in a path string to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).as_ref())
}

fn normalize_path(path_str: &str, root: &Path) -> Result<PathBuf, AppError> {
    let expanded_path = expand_tilde_path_buf(path_str);

    let absolute_path = if expanded_path.is_absolute() {
        expanded_path
    } else {
        root.join(expanded_path)
    };

    let mut components = Vec::new();
    for component in absolute_path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` above the filesystem root stays at the root
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
            _ => components.push(component),
        }
    }
    let normalized: PathBuf = components.iter().collect();

    Ok(dunce::canonicalize(&normalized).unwrap_or(normalized))
}

/// Resolves a session working folder against the root; `None` or an empty string means the root itself.
pub fn resolve_working_folder(
    working_folder: Option<&str>,
    resolver: &dyn RootResolver,
) -> Result<PathBuf, AppError> {
    let root = resolver.resolve_root();
    let resolved = match working_folder.map(str::trim).filter(|s| !s.is_empty()) {
        Some(folder) => normalize_path(folder, &root)?,
        None => normalize_path(".", &root)?,
    };
    debug!(root = %root.display(), resolved = %resolved.display(), "Resolved working folder");

    if !resolved.is_dir() {
        return Err(AppError::InvalidArgument(format!(
            "Working folder is not an existing directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}
