/// Project manifest (`package.json`) inspection.
///
/// Only the `scripts` table matters to the bridge: it decides which
/// command serves the mounted project.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

pub const MANIFEST_FILE: &str = "package.json";

/// Scripts tried in order when picking the serve command.
pub const SERVE_SCRIPT_PREFERENCE: [&str; 3] = ["dev", "start", "serve"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub scripts: BTreeMap<String, Value>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

/// The command line used to start the project's server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeCommand {
    pub script: String,
    /// Arguments for the package manager, e.g. `["run", "dev"]`.
    pub args: Vec<String>,
}

/// Picks `dev`, then `start`, then `serve`, then `default_script`.
pub fn select_serve_script<'a>(manifest: &'a Manifest, default_script: &'a str) -> &'a str {
    SERVE_SCRIPT_PREFERENCE
        .iter()
        .copied()
        .find(|script| manifest.has_script(script))
        .unwrap_or(default_script)
}

/// `start` maps to `<pm> start`, which npm resolves even without an
/// explicit entry (`node server.js`). Everything else goes through `run`.
pub fn serve_command(manifest: &Manifest, default_script: &str) -> ServeCommand {
    let script = select_serve_script(manifest, default_script).to_string();
    let args = if script == "start" {
        vec!["start".to_string()]
    } else {
        vec!["run".to_string(), script.clone()]
    };
    ServeCommand { script, args }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        Manifest::parse(json).unwrap()
    }

    #[test]
    fn test_dev_wins_over_everything() {
        let m = manifest(r#"{"scripts": {"serve": "x", "start": "y", "dev": "vite"}}"#);
        assert_eq!(select_serve_script(&m, "start"), "dev");
    }

    #[test]
    fn test_start_when_no_dev() {
        let m = manifest(r#"{"scripts": {"start": "node index.js", "serve": "x"}}"#);
        assert_eq!(select_serve_script(&m, "dev"), "start");
    }

    #[test]
    fn test_serve_when_only_serve() {
        let m = manifest(r#"{"scripts": {"serve": "http-server", "build": "tsc"}}"#);
        assert_eq!(select_serve_script(&m, "start"), "serve");
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let m = manifest(r#"{"name": "demo", "scripts": {"build": "tsc", "test": "jest"}}"#);
        let first = serve_command(&m, "start");
        for _ in 0..10 {
            assert_eq!(serve_command(&m, "start"), first);
        }
        assert_eq!(first.script, "start");
        assert_eq!(first.args, vec!["start"]);
    }

    #[test]
    fn test_no_scripts_table() {
        let m = manifest(r#"{"name": "bare"}"#);
        assert!(m.scripts.is_empty());
        assert_eq!(select_serve_script(&m, "start"), "start");
    }

    #[test]
    fn test_unrelated_fields_of_any_shape_are_ignored() {
        let m = manifest(
            r#"{"name": {"scope": "@acme"}, "version": 3, "private": true, "scripts": {"dev": "vite"}}"#,
        );
        assert_eq!(select_serve_script(&m, "start"), "dev");
    }

    #[test]
    fn test_run_args_for_non_start_script() {
        let m = manifest(r#"{"scripts": {"dev": "vite"}}"#);
        let cmd = serve_command(&m, "start");
        assert_eq!(cmd.args, vec!["run", "dev"]);
    }

    #[test]
    fn test_custom_default_script() {
        let m = manifest("{}");
        let cmd = serve_command(&m, "preview");
        assert_eq!(cmd.script, "preview");
        assert_eq!(cmd.args, vec!["run", "preview"]);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(Manifest::parse("{ not json").is_err());
        assert!(Manifest::parse(r#"{"scripts": []}"#).is_err());
    }
}
