//! Files generated for new repositories and run directories.

use anyhow::Result;
use minijinja::{Environment, context};

const PRECHECK_TEMPLATE: &str = include_str!("scaffold/tally-check.sh");
const STARTER_TEMPLATE: &str = include_str!("scaffold/template.yaml");
const README_TEMPLATE: &str = include_str!("scaffold/README.md");

/// Template engine wrapper around minijinja.
pub struct Scaffold {
    env: Environment<'static>,
}

impl Default for Scaffold {
    fn default() -> Self {
        Self::new()
    }
}

impl Scaffold {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("precheck", PRECHECK_TEMPLATE)
            .expect("precheck template should be valid");
        env.add_template("starter", STARTER_TEMPLATE)
            .expect("starter template should be valid");
        env.add_template("readme", README_TEMPLATE)
            .expect("readme template should be valid");
        Self { env }
    }

    /// The `tally-check` script for run directory `run`.
    pub fn precheck_script(&self, run: &str) -> Result<String> {
        Ok(self.env.get_template("precheck")?.render(context! { run => run })?)
    }

    /// Minimal checklist template; `filename` names its preamble entry.
    pub fn starter_template(&self, filename: &str) -> Result<String> {
        Ok(self
            .env
            .get_template("starter")?
            .render(context! { filename => filename })?)
    }

    pub fn readme(&self, name: &str) -> Result<String> {
        Ok(self.env.get_template("readme")?.render(context! { name => name })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compile::{CompileOptions, compile};
    use crate::core::resolve::resolve_str;

    #[test]
    fn precheck_script_succeeds_by_default() {
        let script = Scaffold::new().precheck_script("plan-2024-01-01.0").expect("render");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("plan-2024-01-01.0"));
        assert!(script.ends_with("exit 0\n"));
    }

    /// Verifies the starter template compiles into a usable checklist.
    #[test]
    fn starter_template_compiles() {
        let text = Scaffold::new().starter_template("lab.yaml").expect("render");
        let doc = resolve_str(&text).expect("resolve");
        let checklist = compile(&doc, &CompileOptions::default()).expect("compile");
        assert_eq!(checklist.instances.len(), 1);
        assert_eq!(checklist.instances[0].actor_id, "actor1");
        assert!(checklist.document.contains("minimal example generated by tally setup"));
    }

    #[test]
    fn readme_names_the_repository() {
        let readme = Scaffold::new().readme("lab").expect("render");
        assert_eq!(readme, "# lab test repository\n\nPlease fill me in\n");
    }
}
