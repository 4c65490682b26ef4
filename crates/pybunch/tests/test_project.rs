use std::{fs, path::Path, process::Command};

use pretty_assertions::assert_eq;
use pybunch::{
    discovery::SourceRoot,
    error::BundleError,
    interpreter::Interpreter,
    module_path::ModulePath,
    project::Project,
    resolver::AliasTable,
};
use tempfile::TempDir;

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, source) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }
}

/// A small project: an entry script, a package with a used and an unused
/// module, a runnable package, and an unrelated vendored package
fn sample_project(temp_dir: &TempDir) -> Project {
    let src = temp_dir.path().join("src");
    let vendor = temp_dir.path().join("vendor");
    write_tree(
        &src,
        &[
            (
                "main.py",
                "import app\nfrom app.greeting import greet\nprint(greet('bundle'))\nprint(app.VERSION)\n",
            ),
            ("app/__init__.py", "VERSION = 3\n"),
            (
                "app/greeting.py",
                "from .text import prefix\n\ndef greet(name):\n    return prefix() + name\n",
            ),
            ("app/text.py", "def prefix():\n    return 'hello '\n"),
            ("app/unused.py", "x = 1\n"),
            ("cli/__init__.py", ""),
            ("cli/__main__.py", "print('cli main')\n"),
        ],
    );
    write_tree(&vendor, &[("core.py", "value = 5\n")]);

    Project::discover(
        &[
            SourceRoot::plain(&src),
            SourceRoot::package("thirdparty", &vendor),
        ],
        AliasTable::default(),
    )
    .unwrap()
}

fn names(modules: &[ModulePath]) -> Vec<String> {
    modules.iter().map(ModulePath::dotted).collect()
}

#[test]
fn test_discovered_modules() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    let modules: Vec<_> = project.modules().identities().cloned().collect();
    assert_eq!(
        names(&modules),
        vec![
            "app.__init__",
            "app.greeting",
            "app.text",
            "app.unused",
            "cli.__init__",
            "cli.__main__",
            "main",
            "thirdparty.core",
        ]
    );
}

#[test]
fn test_translate_entrypoint() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    assert_eq!(
        project.translate_entrypoint("main").unwrap(),
        ModulePath::from_name("main")
    );
    assert_eq!(
        project.translate_entrypoint("cli").unwrap(),
        ModulePath::from_name("cli.__main__")
    );
    assert_eq!(
        project.translate_entrypoint("nope").unwrap_err(),
        BundleError::NonexistentEntrypoint("nope".to_owned())
    );
}

#[test]
fn test_dependencies_follow_imports() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    assert_eq!(
        names(&project.dependencies("main").unwrap()),
        vec!["app.__init__", "app.greeting", "app.text", "main"]
    );
}

#[test]
fn test_static_optimization_prunes_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);

    let full = project.pack("main", false).unwrap();
    assert!(full.contains("\"app.unused\": "));
    assert!(full.contains("\"thirdparty.core\": "));

    let optimized = project.pack("main", true).unwrap();
    assert!(optimized.contains("\"app.text\": "));
    assert!(!optimized.contains("\"app.unused\": "));
    assert!(!optimized.contains("\"thirdparty.core\": "));
    assert!(optimized.ends_with("execute_entry(\"main\")\n"));
}

#[test]
fn test_package_entrypoint_is_packed_as_main_module() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    let packed = project.pack("cli", true).unwrap();
    assert!(packed.ends_with("execute_entry(\"cli.__main__\")\n"));
}

#[test]
fn test_nonexistent_entrypoint_fails_before_packing() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    let error = project.pack("missing", false).unwrap_err();
    assert_eq!(
        error.downcast_ref::<BundleError>(),
        Some(&BundleError::NonexistentEntrypoint("missing".to_owned()))
    );
}

#[test]
fn test_runtime_executes_discovered_project() {
    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    let mut host = Interpreter::new();
    let mut runtime = project.runtime::<Interpreter>().unwrap();

    runtime.execute_entry(&mut host, "main").unwrap();
    assert_eq!(host.output(), "hello bundle\n3\n");

    let mut loaded: Vec<_> = runtime.loaded_modules().cloned().collect();
    loaded.sort();
    assert_eq!(
        names(&loaded),
        vec!["app.__init__", "app.greeting", "app.text", "app.unused", "main"]
    );
}

#[test]
fn test_cycle_in_closure_fails_at_run_time() {
    let temp_dir = TempDir::new().unwrap();
    write_tree(
        temp_dir.path(),
        &[
            ("main.py", "import ping\n"),
            ("ping.py", "import pong\n"),
            ("pong.py", "import ping\n"),
        ],
    );
    let project =
        Project::discover(&[SourceRoot::plain(temp_dir.path())], AliasTable::default()).unwrap();

    // The static analysis only warns; packing still succeeds.
    assert_eq!(
        names(&project.dependencies("main").unwrap()),
        vec!["main", "ping", "pong"]
    );

    let mut host = Interpreter::new();
    let mut runtime = project.runtime::<Interpreter>().unwrap();
    assert_eq!(
        runtime.execute_entry(&mut host, "main").unwrap_err(),
        BundleError::CyclicImport(ModulePath::from_name("ping"))
    );
}

/// Runs the packed artifact with a real interpreter when one is installed
#[test]
fn test_artifact_runs_under_python() {
    let Ok(version) = Command::new("python3").arg("--version").output() else {
        return;
    };
    if !version.status.success() {
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let project = sample_project(&temp_dir);
    let artifact = temp_dir.path().join("packed.py");
    fs::write(&artifact, project.pack("main", true).unwrap()).unwrap();

    // Run away from the sources so nothing can be imported from disk.
    let output = Command::new("python3")
        .arg(&artifact)
        .current_dir(std::env::temp_dir())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello bundle\n3\n");
}
