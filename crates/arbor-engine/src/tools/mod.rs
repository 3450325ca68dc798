pub mod execution;
pub mod read;
pub mod write;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::registry::ToolRegistry;

pub use execution::ToolExecution;

/// Registry with the built-in file tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(read::ReadTool));
    registry.register(Arc::new(write::WriteTool));
    registry
}

pub(crate) fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}
