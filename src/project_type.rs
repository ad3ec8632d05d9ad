//! Framework detection from `package.json`.

use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST: &str = "package.json";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIs,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Vite,
    Nextjs,
    Cra,
    Nuxt,
    Angular,
    Vue,
    Express,
    Gatsby,
    Remix,
    Astro,
    Node,
}

/// Dependency signatures in priority order; first match wins.
const SIGNATURES: &[(&[&str], Framework)] = &[
    (&["vite"], Framework::Vite),
    (&["next"], Framework::Nextjs),
    (&["react-scripts"], Framework::Cra),
    (&["nuxt", "nuxt3"], Framework::Nuxt),
    (&["@angular/core"], Framework::Angular),
    (&["vue-cli-service", "@vue/cli-service"], Framework::Vue),
    (&["express"], Framework::Express),
    (&["gatsby"], Framework::Gatsby),
    (&["@remix-run/dev"], Framework::Remix),
    (&["astro"], Framework::Astro),
];

impl Framework {
    pub fn display_name(&self) -> &'static str {
        match self {
            Framework::Vite => "Vite",
            Framework::Nextjs => "Next.js",
            Framework::Cra => "Create React App",
            Framework::Nuxt => "Nuxt",
            Framework::Angular => "Angular",
            Framework::Vue => "Vue CLI",
            Framework::Express => "Express",
            Framework::Gatsby => "Gatsby",
            Framework::Remix => "Remix",
            Framework::Astro => "Astro",
            Framework::Node => "Node.js",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Framework::Vite => 5173,
            Framework::Angular => 4200,
            Framework::Vue => 8080,
            Framework::Gatsby => 8000,
            _ => 3000,
        }
    }

    /// create-react-app compiles before printing anything useful.
    pub fn is_slow_to_boot(&self) -> bool {
        self.is_cra()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub framework: Framework,
    pub display_name: &'static str,
    pub default_port: u16,
}

impl From<Framework> for ProjectInfo {
    fn from(framework: Framework) -> Self {
        Self {
            framework,
            display_name: framework.display_name(),
            default_port: framework.default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum StartScript {
    #[strum(serialize = "dev")]
    Dev,
    #[strum(serialize = "serve")]
    Serve,
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "build+start")]
    BuildThenStart,
}

impl StartScript {
    /// Shell command line that runs this script with the given npm executable.
    pub fn command(&self, npm: &str) -> String {
        match self {
            StartScript::Dev => format!("{npm} run dev"),
            StartScript::Serve => format!("{npm} run serve"),
            StartScript::Start => format!("{npm} start"),
            StartScript::BuildThenStart => format!("{npm} run build && {npm} start"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    scripts: BTreeMap<String, serde_json::Value>,
}

impl PackageJson {
    fn read(project: &Path) -> Result<Self, ManifestError> {
        let path = manifest_path(project);
        let raw = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ManifestError::Parse { path, source })
    }

    fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    fn has_script(&self, name: &str) -> bool {
        match self.scripts.get(name) {
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Null) | None => false,
            Some(_) => true,
        }
    }

    fn framework(&self) -> Framework {
        SIGNATURES
            .iter()
            .find(|(names, _)| names.iter().any(|n| self.has_dependency(n)))
            .map(|(_, framework)| *framework)
            .unwrap_or(Framework::Node)
    }

    fn start_script(&self) -> Option<StartScript> {
        if self.has_script("dev") {
            Some(StartScript::Dev)
        } else if self.has_script("serve") {
            Some(StartScript::Serve)
        } else if self.has_script("start") {
            Some(StartScript::Start)
        } else if self.has_script("build") {
            Some(StartScript::BuildThenStart)
        } else {
            None
        }
    }
}

pub fn manifest_path(project: &Path) -> PathBuf {
    project.join(MANIFEST)
}

/// Classify the project. An unreadable or malformed manifest is a plain Node project.
pub fn detect(project: &Path) -> ProjectInfo {
    match PackageJson::read(project) {
        Ok(manifest) => manifest.framework().into(),
        Err(e) => {
            debug!("falling back to node for {}: {e}", project.display());
            Framework::Node.into()
        }
    }
}

/// `dev`, then `serve`, then `start`; `build` alone means build then start.
pub fn pick_start_script(project: &Path) -> Result<StartScript, ManifestError> {
    PackageJson::read(project)?
        .start_script()
        .ok_or_else(|| ManifestError::NoStartScript {
            path: manifest_path(project),
        })
}

pub fn dependencies_installed(project: &Path) -> bool {
    manifest_path(project).is_file() && project.join("node_modules").is_dir()
}

/// Whether the project directory and its manifest can be read by this user.
pub fn manifest_readable(project: &Path) -> bool {
    project.is_dir() && std::fs::File::open(manifest_path(project)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(manifest: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST), manifest).unwrap();
        dir
    }

    #[test]
    fn test_detect_vite() {
        let dir = project(r#"{"devDependencies": {"vite": "^5.0.0"}}"#);
        let info = detect(dir.path());
        assert_eq!(info.framework, Framework::Vite);
        assert_eq!(info.default_port, 5173);
        assert_eq!(info.display_name, "Vite");
    }

    #[test]
    fn test_detect_first_signature_wins() {
        // vite outranks react-scripts regardless of which map it lives in
        let dir = project(
            r#"{"dependencies": {"react-scripts": "5", "express": "4"}, "devDependencies": {"vite": "5"}}"#,
        );
        assert_eq!(detect(dir.path()).framework, Framework::Vite);

        let dir = project(r#"{"dependencies": {"express": "4", "react-scripts": "5"}}"#);
        assert_eq!(detect(dir.path()).framework, Framework::Cra);
    }

    #[test]
    fn test_detect_table() {
        let cases = [
            ("next", Framework::Nextjs, 3000),
            ("nuxt3", Framework::Nuxt, 3000),
            ("@angular/core", Framework::Angular, 4200),
            ("@vue/cli-service", Framework::Vue, 8080),
            ("gatsby", Framework::Gatsby, 8000),
            ("@remix-run/dev", Framework::Remix, 3000),
            ("astro", Framework::Astro, 3000),
            ("lodash", Framework::Node, 3000),
        ];
        for (dep, framework, port) in cases {
            let dir = project(&format!(r#"{{"dependencies": {{"{dep}": "1"}}}}"#));
            let info = detect(dir.path());
            assert_eq!(info.framework, framework, "{dep}");
            assert_eq!(info.default_port, port, "{dep}");
        }
    }

    #[test]
    fn test_detect_unreadable_manifest_is_node() {
        let dir = project("{ not json");
        assert_eq!(detect(dir.path()).framework, Framework::Node);
        let empty = tempfile::tempdir().unwrap();
        assert_eq!(detect(empty.path()).framework, Framework::Node);
    }

    #[test]
    fn test_framework_tags() {
        assert_eq!(Framework::Nextjs.to_string(), "nextjs");
        assert_eq!(Framework::Cra.to_string(), "cra");
        assert!(Framework::Cra.is_slow_to_boot());
        assert!(!Framework::Vite.is_slow_to_boot());
    }

    #[test]
    fn test_pick_start_script_order() {
        let dir = project(r#"{"scripts": {"start": "node .", "dev": "vite", "serve": "x"}}"#);
        assert_eq!(pick_start_script(dir.path()).unwrap(), StartScript::Dev);

        let dir = project(r#"{"scripts": {"start": "node .", "serve": "x"}}"#);
        assert_eq!(pick_start_script(dir.path()).unwrap(), StartScript::Serve);

        let dir = project(r#"{"scripts": {"start": "node .", "build": "tsc"}}"#);
        assert_eq!(pick_start_script(dir.path()).unwrap(), StartScript::Start);

        let dir = project(r#"{"scripts": {"build": "tsc"}}"#);
        assert_eq!(
            pick_start_script(dir.path()).unwrap(),
            StartScript::BuildThenStart
        );
    }

    #[test]
    fn test_pick_start_script_ignores_empty_scripts() {
        let dir = project(r#"{"scripts": {"dev": "", "start": "node server.js"}}"#);
        assert_eq!(pick_start_script(dir.path()).unwrap(), StartScript::Start);
    }

    #[test]
    fn test_no_start_script() {
        let dir = project(r#"{"scripts": {"test": "jest"}}"#);
        assert!(matches!(
            pick_start_script(dir.path()),
            Err(ManifestError::NoStartScript { .. })
        ));
    }

    #[test]
    fn test_start_script_commands() {
        assert_eq!(StartScript::Dev.command("npm"), "npm run dev");
        assert_eq!(StartScript::Start.command("npm.cmd"), "npm.cmd start");
        assert_eq!(
            StartScript::BuildThenStart.command("npm"),
            "npm run build && npm start"
        );
    }

    #[test]
    fn test_dependencies_installed() {
        let dir = project("{}");
        assert!(!dependencies_installed(dir.path()));
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        assert!(dependencies_installed(dir.path()));
        assert!(manifest_readable(dir.path()));
    }
}
