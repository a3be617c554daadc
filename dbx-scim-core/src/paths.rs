use std::path::{Path, PathBuf};

use crate::error::CoreError;

pub const STATE_DIR: &str = ".dbx-scim";
pub const DELTA_TOKEN_FILE: &str = "graph_incremental_token.json";

pub fn state_root(home: &Path) -> PathBuf {
    home.join(STATE_DIR)
}

/// Default state directory, `~/.dbx-scim/`.
pub fn default_state_root() -> Result<PathBuf, CoreError> {
    dirs::home_dir()
        .map(|home| state_root(&home))
        .ok_or(CoreError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StateLocation;
    use crate::types::PrincipalKind;
    use tempfile::TempDir;

    #[test]
    fn state_root_is_a_hidden_dir_under_home() {
        assert_eq!(
            state_root(Path::new("/home/ada")),
            PathBuf::from("/home/ada/.dbx-scim")
        );
    }

    #[test]
    fn documents_live_directly_under_state_root() {
        let tmp = TempDir::new().expect("tmp");
        let root = state_root(tmp.path());
        let location = StateLocation::Local(root.clone());
        let cache = location.storage(PrincipalKind::ServicePrincipal.spec().cache_file);
        cache.write("{}").expect("write");
        assert!(root.join("cache_spn.json").is_file());
        let token = location.storage(DELTA_TOKEN_FILE);
        assert_eq!(
            token.location(),
            root.join("graph_incremental_token.json").display().to_string()
        );
    }
}
