pub mod cache;
pub mod purge;
pub mod sync;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use dbx_scim_core::{paths, StateLocation};

/// Where name caches and the change-feed token are kept.
#[derive(Args, Debug, Clone, Default)]
pub struct StateArgs {
    /// State directory [default: ~/.dbx-scim].
    #[arg(long, global = true, value_name = "DIR", conflicts_with = "state_url")]
    pub state_dir: Option<PathBuf>,

    /// Blob container URL, SAS query string included, to keep state in instead.
    #[arg(long, global = true, value_name = "URL")]
    pub state_url: Option<String>,
}

impl StateArgs {
    pub fn location(&self) -> Result<StateLocation> {
        if let Some(url) = &self.state_url {
            if !url.starts_with("https://") {
                bail!("--state-url must be an https:// blob container URL");
            }
            return Ok(StateLocation::blob_from_url(url));
        }
        let root = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => paths::default_state_root().context("could not determine home directory")?,
        };
        Ok(StateLocation::Local(root))
    }
}

/// Read a JSON or YAML list of group display names.
pub fn load_group_names(path: &Path) -> Result<BTreeSet<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read groups file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let names: Vec<String> = if is_json {
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse groups file {}", path.display()))?
    } else if contents.trim().is_empty() {
        Vec::new()
    } else {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse groups file {}", path.display()))?
    };
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("groups.json", r#"["admins", " platform ", ""]"#)]
    #[case("groups.yml", "- admins\n- platform\n- admins\n")]
    #[case("groups.yaml", "[admins, platform]")]
    fn group_files_parse_in_either_format(#[case] file: &str, #[case] contents: &str) {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join(file);
        std::fs::write(&path, contents).expect("write");
        let names = load_group_names(&path).unwrap();
        assert_eq!(
            names,
            BTreeSet::from(["admins".to_string(), "platform".to_string()])
        );
    }

    #[test]
    fn empty_yaml_file_is_an_empty_list() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("groups.yml");
        std::fs::write(&path, "\n").expect("write");
        assert!(load_group_names(&path).unwrap().is_empty());
    }

    #[test]
    fn non_list_is_rejected() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("groups.json");
        std::fs::write(&path, r#"{"admins": true}"#).expect("write");
        let err = load_group_names(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse groups file"));
    }

    #[test]
    fn state_url_must_be_https() {
        let args = StateArgs {
            state_dir: None,
            state_url: Some("http://acct.blob.core.windows.net/state".into()),
        };
        assert!(args.location().is_err());

        let args = StateArgs {
            state_dir: None,
            state_url: Some("https://acct.blob.core.windows.net/state?sv=1&sig=x".into()),
        };
        assert!(matches!(
            args.location().unwrap(),
            StateLocation::Blob { sas_token: Some(_), .. }
        ));
    }

    #[test]
    fn state_dir_overrides_home() {
        let args = StateArgs {
            state_dir: Some(PathBuf::from("/tmp/dbx")),
            state_url: None,
        };
        assert_eq!(
            args.location().unwrap(),
            StateLocation::Local(PathBuf::from("/tmp/dbx"))
        );
    }
}
