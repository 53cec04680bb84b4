//! Picks a `Group` loader flavor from a filesystem path: a directory loads
//! as a directory group, anything else loads as a single group file.

use std::path::Path;

use st_lib::Group;

pub fn load_group(path: &Path) -> Result<Group, String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let result = if meta.is_dir() { Group::from_dir(path) } else { Group::from_file(path) };
    result.map_err(|e| format!("{}: {e}", path.display()))
}
