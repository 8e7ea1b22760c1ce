//! Writes the forged chain and the client's skin claims for later inspection.

use crate::error::Result;
use crate::protocol::auth::ForgedChain;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CHAIN_FILE: &str = "chainData.json";
pub const SKIN_FILE: &str = "skinData.json";

/// `<sessions_dir>/<display_name>-<unix millis>`, with the name reduced to a
/// file-system-safe form.
pub fn session_dir(sessions_dir: &Path, display_name: &str, unix_millis: u128) -> PathBuf {
    let safe: String = display_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    sessions_dir.join(format!("{safe}-{unix_millis}"))
}

/// Writes both documents into a fresh session directory and returns it.
///
/// 将两份文档写入新的会话目录并返回该目录。
pub fn save_auth_details(
    sessions_dir: &Path,
    display_name: &str,
    chain: &ForgedChain,
    skin_claims: &Value,
) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let dir = session_dir(sessions_dir, display_name, millis);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(CHAIN_FILE), serde_json::to_string_pretty(chain)?)?;
    std::fs::write(dir.join(SKIN_FILE), serde_json::to_string_pretty(skin_claims)?)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_made_path_safe() {
        let dir = session_dir(Path::new("sessions"), "Steve/../x y", 42);
        assert_eq!(dir, Path::new("sessions/Steve____x_y-42"));
    }

    #[test]
    fn both_documents_are_written() {
        let root = tempfile::tempdir().unwrap();
        let chain = ForgedChain::new(vec!["a.b.c".into()]);
        let dir = save_auth_details(root.path(), "Alex", &chain, &json!({ "SkinId": "s" })).unwrap();

        let chain_text = std::fs::read_to_string(dir.join(CHAIN_FILE)).unwrap();
        assert_eq!(ForgedChain::from_json(&chain_text).unwrap(), chain);
        let skin: Value = serde_json::from_str(&std::fs::read_to_string(dir.join(SKIN_FILE)).unwrap()).unwrap();
        assert_eq!(skin["SkinId"], "s");
    }
}
