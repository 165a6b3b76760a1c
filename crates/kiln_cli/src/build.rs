//! `kiln build`: builds declared assets and their dependencies.

use kiln_pipeline::{BuildManifest, BuildOptions, BuildStatus, PipelineBuilder};
use tracing::warn;

use crate::project::Project;
use crate::{BuildArgs, GlobalArgs};

/// Runs the `kiln build` command.
///
/// Returns exit code 0 when every node is built or up to date, 1 when any
/// node failed and 2 when the build was cancelled.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = Project::load(global)?;
    let Some(manifest) = build_project(&project, args)? else {
        return Ok(0);
    };
    if !global.quiet || !manifest.is_success() {
        eprintln!("{}", manifest.summary());
    }
    Ok(exit_code(&manifest))
}

/// Builds the selected roots of `project`. Returns `None` when the project
/// declares no assets.
fn build_project(
    project: &Project,
    args: &BuildArgs,
) -> Result<Option<BuildManifest>, Box<dyn std::error::Error>> {
    let roots = project.roots(&args.guids);
    if roots.is_empty() {
        warn!("no assets declared in {}", project.dir.display());
        return Ok(None);
    }

    let sources = project.sources()?;
    let registry = project.registry();
    let db = project.open_db()?;
    let cache = project.cache();

    let options = BuildOptions {
        force: args.force || project.config.build.force,
        threads: args.threads.unwrap_or(project.config.build.threads),
    };
    let manifest = PipelineBuilder::new(&registry, &sources, &db, &cache)
        .with_options(options)
        .with_file_root(project.asset_root())
        .build(&roots)?;
    db.close();
    Ok(Some(manifest))
}

fn exit_code(manifest: &BuildManifest) -> i32 {
    if manifest.status() == BuildStatus::Cancelled {
        2
    } else if manifest.is_success() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const GUID_A: &str = "6c8f3c62-2d0c-4b5e-9a57-3f1f2b9e0a11";
    const GUID_B: &str = "0d3e1a55-7f6b-4c1e-8f3a-2a9c6b1d4e70";

    fn write_project(dir: &std::path::Path, file: &str) {
        fs::create_dir_all(dir.join("assets")).unwrap();
        fs::write(
            dir.join("kiln.toml"),
            format!(
                r#"
[project]
name = "demo"
root = "assets"

[[asset]]
guid = "{GUID_A}"
type = "raw"
file = "{file}"

[[asset]]
guid = "{GUID_B}"
type = "group"
dependencies = [{{ guid = "{GUID_A}", kind = "hard" }}]
"#
            ),
        )
        .unwrap();
    }

    fn global(dir: &std::path::Path) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.display().to_string()),
        }
    }

    fn args() -> BuildArgs {
        BuildArgs {
            guids: Vec::new(),
            force: false,
            threads: Some(2),
        }
    }

    #[test]
    fn builds_project_and_persists_state() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "stone.png");
        fs::write(tmp.path().join("assets/stone.png"), b"pixels").unwrap();

        assert_eq!(run(&args(), &global(tmp.path())).unwrap(), 0);
        assert!(tmp.path().join(".kiln/pipeline.db").is_file());
        assert!(tmp.path().join(".kiln/cache").is_dir());

        // Second run is served from the persisted state.
        let project = Project::load(&global(tmp.path())).unwrap();
        let manifest = build_project(&project, &args()).unwrap().unwrap();
        assert_eq!(manifest.skipped().len(), 2);
        assert!(manifest.succeeded().is_empty());
    }

    fn copy_tree(from: &std::path::Path, to: &std::path::Path) {
        fs::create_dir_all(to).unwrap();
        for entry in fs::read_dir(from).unwrap() {
            let entry = entry.unwrap();
            let target = to.join(entry.file_name());
            if entry.file_type().unwrap().is_dir() {
                copy_tree(&entry.path(), &target);
            } else {
                fs::copy(entry.path(), target).unwrap();
            }
        }
    }

    #[test]
    fn moved_project_is_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("original");
        write_project(&original, "stone.png");
        fs::write(original.join("assets/stone.png"), b"pixels").unwrap();
        assert_eq!(run(&args(), &global(&original)).unwrap(), 0);

        let moved = tmp.path().join("moved");
        copy_tree(&original, &moved);
        fs::remove_dir_all(&original).unwrap();

        let project = Project::load(&global(&moved)).unwrap();
        let manifest = build_project(&project, &args()).unwrap().unwrap();
        assert_eq!(manifest.skipped().len(), 2);
    }

    #[test]
    fn empty_project_builds_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("kiln.toml"), "[project]\nname = \"empty\"\n").unwrap();
        assert_eq!(run(&args(), &global(tmp.path())).unwrap(), 0);
    }

    #[test]
    fn failed_node_gives_exit_code_one() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "missing.png");
        assert_eq!(run(&args(), &global(tmp.path())).unwrap(), 1);
    }

    #[test]
    fn missing_project_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(run(&args(), &global(&tmp.path().join("kiln.toml"))).is_err());
    }
}
