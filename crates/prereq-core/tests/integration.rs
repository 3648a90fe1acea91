use prereq_core::{BuildDeps, CoreError, ErrorKind, Phase, Registry, ResolveOptions};
use prereq_fetch::{Downloader, FetchError};
use prereq_runtime::{BuildEnv, FsProbe, MockRunner};
use prereq_schema::{parse_definitions_str, PinConfig, PinSection};
use prereq_store::{PrereqLayout, RetrievalMarker};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Downloader for tests that must never touch the network.
#[derive(Default)]
struct NoNetwork {
    calls: AtomicUsize,
}

impl Downloader for NoNetwork {
    fn download(&self, url: &str, _dest: &Path) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Http(format!("network disabled in tests: {url}")))
    }
}

fn registry(root: &Path, runner: &Arc<MockRunner>, options: ResolveOptions) -> Registry {
    Registry::new(PrereqLayout::new(root), options)
        .with_runner(runner.clone())
        .with_probe(Arc::new(FsProbe::with_roots(vec![root.join("sys")])))
        .with_downloader(Arc::new(NoNetwork::default()))
        .with_system_env(BuildEnv::from_host())
}

fn load(reg: &mut Registry, definitions: &str) {
    reg.load_definitions(parse_definitions_str(definitions).unwrap())
        .unwrap();
}

fn pin_all(names: &[&str]) -> PinConfig {
    let mut pins = PinConfig::new();
    for name in names {
        pins.set(PinSection::CommitVersions, name, "0123abcd");
    }
    pins
}

/// Archive-backed component whose sources are already unpacked, so the
/// build runs without a download.
fn archive_component(root: &Path, name: &str, body: &str) -> String {
    fs::create_dir_all(PrereqLayout::new(root).src_path(name)).unwrap();
    format!(
        r#"
[components.{name}]
archive = {{ url = "https://example.com/{name}-1.0.tar.gz", checksum = "sha256:{}" }}
{body}
"#,
        "0".repeat(64)
    )
}

fn executing_options() -> ResolveOptions {
    ResolveOptions {
        trust_existing_sources: true,
        ..ResolveOptions::default()
    }
}

const CHAIN: &str = r#"
[components.a]
git = { url = "https://example.com/a.git" }
requires = ["b"]
commands = [["echo", "build-a"]]

[components.b]
git = { url = "https://example.com/b.git" }
requires = ["c"]
commands = [["echo", "build-b"]]

[components.c]
git = { url = "https://example.com/c.git" }
commands = [["echo", "build-c"]]
"#;

#[test]
fn missing_definition() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default());
    let mut env = BuildEnv::new();
    let err = reg.require(&mut env, &["nonexistent"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingDefinition);
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn transitive_build_order_runs_each_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["a", "b", "c"]));
    load(&mut reg, CHAIN);

    let mut env = BuildEnv::new();
    assert!(reg.require(&mut env, &["a"]).unwrap());
    assert_eq!(
        runner.lines_matching("echo build-"),
        ["echo build-c", "echo build-b", "echo build-a"]
    );
    assert_eq!(runner.lines_matching("git clone").len(), 3);

    let calls = runner.call_count();
    assert!(!reg.require(&mut env, &["a"]).unwrap());
    assert!(!reg.require(&mut env, &["c", "b"]).unwrap());
    assert_eq!(runner.call_count(), calls);

    for name in ["a", "b", "c"] {
        assert_eq!(reg.component(name).unwrap().phase(), Phase::Verified);
        assert!(reg.is_resolved(name));
    }
}

#[test]
fn dependency_builds_before_dependent_starts() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, executing_options());
    let defs = archive_component(
        root,
        "mercury",
        r#"
requires = ["ofi"]
headers = ["mercury.h"]
commands = [
    ["test", "-f", "$OFI_PREFIX/include/rdma/fabric.h"],
    ["mkdir", "-p", "$COMPONENT_PREFIX/include"],
    ["touch", "$COMPONENT_PREFIX/include/mercury.h"],
]
"#,
    ) + &archive_component(
        root,
        "ofi",
        r#"
headers = ["rdma/fabric.h"]
defines = ["HAVE_OFI"]
commands = [
    ["mkdir", "-p", "$COMPONENT_PREFIX/include/rdma", "$COMPONENT_PREFIX/lib"],
    ["touch", "$COMPONENT_PREFIX/include/rdma/fabric.h"],
]
"#,
    );
    load(&mut reg, &defs);

    let mut env = BuildEnv::new();
    assert!(reg.require(&mut env, &["mercury"]).unwrap());

    let layout = PrereqLayout::new(root);
    assert!(layout.prereq_prefix("ofi").join("include/rdma/fabric.h").is_file());
    assert!(layout.prereq_prefix("mercury").join("include/mercury.h").is_file());
    assert!(env
        .include_paths()
        .contains(&layout.prereq_prefix("mercury").join("include")));
    assert_eq!(
        env.var("MERCURY_PREFIX"),
        Some(layout.prereq_prefix("mercury").display().to_string().as_str())
    );
    assert!(!env.defines().contains(&"HAVE_OFI".to_owned()));

    let first_test = runner
        .calls()
        .iter()
        .position(|c| c.program() == "test")
        .unwrap();
    let ofi_touch = runner
        .calls()
        .iter()
        .position(|c| c.line().contains("fabric.h") && c.program() == "touch")
        .unwrap();
    assert!(ofi_touch < first_test);
}

#[test]
fn cached_failure_is_reraised_without_rerunning() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().fail_when("explode"));
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["spdk", "daos"]));
    load(
        &mut reg,
        r#"
[components.spdk]
git = { url = "https://example.com/spdk.git" }
commands = [["./configure"], ["make", "explode"]]

[components.daos]
git = { url = "https://example.com/daos.git" }
requires = ["spdk"]
commands = [["scons"]]
"#,
    );

    let mut env = BuildEnv::new();
    let first = reg.require(&mut env, &["spdk"]).unwrap_err();
    assert_eq!(first.kind(), ErrorKind::BuildFailure);
    assert!(first.to_string().contains("make -j"));
    let calls = runner.call_count();

    let second = reg.require(&mut env, &["spdk"]).unwrap_err();
    assert!(Arc::ptr_eq(
        first.cached().unwrap(),
        second.cached().unwrap()
    ));
    assert_eq!(runner.call_count(), calls);
    assert_eq!(reg.component("spdk").unwrap().phase(), Phase::Failed);

    let dependent = reg.require(&mut env, &["daos"]).unwrap_err();
    assert_eq!(dependent.kind(), ErrorKind::BuildFailure);
    assert!(runner.lines_matching("scons").is_empty());
    assert!(Arc::ptr_eq(
        reg.error_of("spdk").unwrap(),
        first.cached().unwrap()
    ));
}

#[test]
fn unpinned_git_component_fails_before_clone() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default());
    load(
        &mut reg,
        r#"
[components.foo]
git = { url = "https://example.com/foo.git" }
commands = [["make"]]
"#,
    );
    let err = reg.require(&mut BuildEnv::new(), &["foo"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DownloadFailure);
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn preinstalled_component_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let sys = dir.path().join("sys");
    fs::create_dir_all(sys.join("include")).unwrap();
    fs::create_dir_all(sys.join("lib")).unwrap();
    fs::write(sys.join("include/bar.h"), "").unwrap();
    fs::write(sys.join("lib/libbar.so"), "").unwrap();

    let runner = Arc::new(MockRunner::new());
    let options = ResolveOptions {
        installed: ["bar".to_owned()].into(),
        ..ResolveOptions::default()
    };
    let mut reg = registry(dir.path(), &runner, options);
    load(
        &mut reg,
        r#"
[components.bar]
headers = ["bar.h"]
libs = ["bar"]

[components.baz]
headers = ["bar.h"]
"#,
    );

    let mut env = BuildEnv::new();
    assert!(!reg.require(&mut env, &["bar", "baz"]).unwrap());
    assert_eq!(runner.call_count(), 0);
    assert_eq!(reg.component("bar").unwrap().phase(), Phase::Installed);
    assert_eq!(reg.component("baz").unwrap().phase(), Phase::Installed);
    assert_eq!(reg.prefix_of("bar"), Some(Path::new("/usr")));
    assert!(reg.is_installed("bar").unwrap());
    assert!(!reg.is_installed("baz").unwrap());
    assert!(env.libs().contains(&"bar".to_owned()));
}

#[test]
fn missing_system_package_names_the_package() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default());
    load(
        &mut reg,
        r#"
[components.uuid]
headers = ["uuid/uuid.h"]
package = "libuuid-devel"
"#,
    );
    let err = reg.require(&mut BuildEnv::new(), &["uuid"]).unwrap_err();
    match err.root_cause() {
        CoreError::MissingTargets { package, .. } => {
            assert_eq!(package.as_deref(), Some("libuuid-devel"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn existing_install_is_verified_and_rebuilt_when_broken() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let defs = archive_component(
        root,
        "isal",
        r#"
headers = ["isa-l.h"]
commands = [
    ["mkdir", "-p", "$COMPONENT_PREFIX/include"],
    ["touch", "$COMPONENT_PREFIX/include/isa-l.h"],
]
"#,
    );
    let header = PrereqLayout::new(root).prereq_prefix("isal").join("include/isa-l.h");

    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, executing_options());
    load(&mut reg, &defs);
    assert!(reg.require(&mut BuildEnv::new(), &["isal"]).unwrap());
    assert!(header.is_file());

    // second run: install present and complete
    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, executing_options());
    load(&mut reg, &defs);
    assert!(!reg.require(&mut BuildEnv::new(), &["isal"]).unwrap());
    assert_eq!(runner.call_count(), 0);
    assert_eq!(reg.component("isal").unwrap().phase(), Phase::Installed);

    // third run: install present but incomplete
    fs::remove_file(&header).unwrap();
    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, executing_options());
    load(&mut reg, &defs);
    assert!(reg.require(&mut BuildEnv::new(), &["isal"]).unwrap());
    assert_eq!(runner.lines_matching("touch").len(), 1);
    assert!(header.is_file());
}

#[test]
fn failed_installed_claim_falls_back_to_build() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let defs = archive_component(
        root,
        "argobots",
        r#"
headers = ["abt.h"]
commands = [
    ["mkdir", "-p", "$COMPONENT_PREFIX/include"],
    ["touch", "$COMPONENT_PREFIX/include/abt.h"],
]
"#,
    );
    let options = ResolveOptions {
        installed: ["all".to_owned()].into(),
        ..executing_options()
    };
    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, options);
    load(&mut reg, &defs);

    assert!(reg.require(&mut BuildEnv::new(), &["argobots"]).unwrap());
    let comp = reg.component("argobots").unwrap();
    assert!(!comp.state().use_installed);
    assert_eq!(comp.phase(), Phase::Verified);
    assert_eq!(runner.lines_matching("touch").len(), 1);
}

#[test]
fn build_policy_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let defs = r#"
[components.pmdk]
git = { url = "https://example.com/pmdk.git" }
commands = [["make"]]
"#;

    let runner = Arc::new(MockRunner::new());
    let options = ResolveOptions {
        build_deps: BuildDeps::No,
        ..ResolveOptions::default()
    };
    let mut reg = registry(dir.path(), &runner, options).with_pins(pin_all(&["pmdk"]));
    load(&mut reg, defs);
    let err = reg.require(&mut BuildEnv::new(), &["pmdk"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BuildRequired);
    assert_eq!(runner.call_count(), 0);

    let options = ResolveOptions {
        build_deps: BuildDeps::BuildOnly,
        ..ResolveOptions::default()
    };
    let mut reg = registry(dir.path(), &runner, options).with_pins(pin_all(&["pmdk"]));
    load(&mut reg, defs);
    let err = reg.require(&mut BuildEnv::new(), &["pmdk"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DownloadRequired);
    assert_eq!(runner.call_count(), 0);

    fs::create_dir_all(reg.layout().src_path("pmdk")).unwrap();
    let mut reg = registry(dir.path(), &runner, options_build_only());
    load(&mut reg, defs);
    assert!(reg.require(&mut BuildEnv::new(), &["pmdk"]).unwrap());
    assert!(runner.lines_matching("git").is_empty());
    assert_eq!(runner.lines_matching("make").len(), 1);
}

fn options_build_only() -> ResolveOptions {
    ResolveOptions {
        build_deps: BuildDeps::BuildOnly,
        ..ResolveOptions::default()
    }
}

#[test]
fn missing_system_libs_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg =
        registry(dir.path(), &runner, ResolveOptions::default()).with_pins(pin_all(&["spdk"]));
    load(
        &mut reg,
        r#"
[components.spdk]
git = { url = "https://example.com/spdk.git" }
required_libs = ["numa-not-here"]
required_progs = ["not-a-real-build-tool"]
commands = [["make"]]
"#,
    );
    let err = reg.require(&mut BuildEnv::new(), &["spdk"]).unwrap_err();
    match err.root_cause() {
        CoreError::MissingSystemLibs { missing, .. } => {
            let names: Vec<&str> = missing.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, ["numa-not-here", "not-a-real-build-tool"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.lines_matching("make").is_empty());
}

#[test]
fn dependency_cycle_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["a", "b"]));
    load(
        &mut reg,
        r#"
[components.a]
git = { url = "https://example.com/a.git" }
requires = ["b"]
commands = [["echo", "build-a"]]

[components.b]
git = { url = "https://example.com/b.git" }
requires = ["a"]
commands = [["echo", "build-b"]]
"#,
    );
    let err = reg.require(&mut BuildEnv::new(), &["a"]).unwrap_err();
    match &err {
        CoreError::DependencyCycle(cycle) => assert_eq!(cycle, &["a", "b", "a"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    assert!(runner.lines_matching("echo build-").is_empty());
}

#[test]
fn interrupt_stops_before_next_command() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let flag = Arc::new(AtomicBool::new(true));
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["c"]))
        .with_cancel_flag(Arc::clone(&flag));
    load(&mut reg, CHAIN);
    let err = reg.require(&mut BuildEnv::new(), &["c"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert!(runner.lines_matching("echo build-c").is_empty());
}

#[test]
fn retrieval_marker_records_revision() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["c"]));
    load(&mut reg, CHAIN);
    reg.require(&mut BuildEnv::new(), &["c"]).unwrap();

    let marker = RetrievalMarker::read(&reg.layout().marker_path("c"))
        .unwrap()
        .unwrap();
    assert_eq!(marker.source, "https://example.com/c.git");
    assert_eq!(marker.revision.as_deref(), Some("0123abcd"));
}

#[test]
fn rpath_patching_is_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sys/bin")).unwrap();
    fs::write(root.join("sys/bin/patchelf"), "").unwrap();

    let runner = Arc::new(MockRunner::executing().fail_when("patchelf"));
    let mut reg = registry(root, &runner, executing_options());
    let defs = archive_component(
        root,
        "mercury",
        r#"
libs = ["mercury"]
patch_rpath = ["lib"]
commands = [
    ["mkdir", "-p", "$COMPONENT_PREFIX/lib"],
    ["touch", "$COMPONENT_PREFIX/lib/libmercury.so"],
]
"#,
    );
    load(&mut reg, &defs);
    assert!(reg.require(&mut BuildEnv::new(), &["mercury"]).unwrap());
    let patched = runner.lines_matching("patchelf --set-rpath");
    assert_eq!(patched.len(), 1);
    assert!(patched[0].contains("$ORIGIN"));
    assert!(patched[0].ends_with("libmercury.so"));
}

#[test]
fn projection_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let runner = Arc::new(MockRunner::executing());
    let mut reg = registry(root, &runner, executing_options());
    let defs = archive_component(
        root,
        "ofi",
        r#"
libs = ["fabric"]
defines = ["HAVE_OFI"]
commands = [
    ["mkdir", "-p", "$COMPONENT_PREFIX/lib", "$COMPONENT_PREFIX/include"],
    ["touch", "$COMPONENT_PREFIX/lib/libfabric.so"],
]
"#,
    );
    load(&mut reg, &defs);

    let mut first = BuildEnv::new();
    let mut second = BuildEnv::new();
    reg.require(&mut first, &["ofi"]).unwrap();
    reg.require(&mut second, &["ofi"]).unwrap();
    assert_eq!(first.include_paths(), second.include_paths());
    assert_eq!(first.lib_paths(), second.lib_paths());
    assert_eq!(first.rpaths(), second.rpaths());
    assert_eq!(first.defines(), second.defines());
    assert_eq!(first.defines(), ["HAVE_OFI"]);
    assert_eq!(first.libs(), ["fabric"]);

    let mut headers = BuildEnv::new();
    reg.require_headers(&mut headers, &["ofi"]).unwrap();
    assert!(headers.libs().is_empty());
    assert_eq!(headers.include_paths(), first.include_paths());
}

#[test]
fn dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let options = ResolveOptions {
        dry_run: true,
        ..ResolveOptions::default()
    };
    let mut reg = registry(dir.path(), &runner, options).with_pins(pin_all(&["a", "b", "c"]));
    load(&mut reg, CHAIN);
    reg.require(&mut BuildEnv::new(), &["a"]).unwrap();
    assert!(!reg.layout().build_root().exists());
    assert!(!reg.layout().prereq_root().exists());
}

#[test]
fn optional_availability_checks() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default());
    load(
        &mut reg,
        r#"
[components.psm2]
optional = true
headers = ["psm2.h"]
"#,
    );
    assert!(!reg.included(&["psm2"]));
    assert!(!reg.check_available(&["psm2"]).unwrap());
    assert_eq!(
        reg.error_of("psm2").map(|e| e.kind()),
        Some(ErrorKind::MissingTargets)
    );
}

#[test]
fn prebuild_requires_each_listed_component() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let mut reg = registry(dir.path(), &runner, ResolveOptions::default())
        .with_pins(pin_all(&["a", "b", "c"]));
    load(&mut reg, &format!("prebuild = [\"b\"]\n{CHAIN}"));
    assert!(reg.prebuild().unwrap());
    assert_eq!(
        runner.lines_matching("echo build-"),
        ["echo build-c", "echo build-b"]
    );
    assert!(!reg.is_resolved("a"));
}
