use std::fs;

use camino::Utf8PathBuf;
use kiln::{Config, Mode, Pipeline};

fn project() -> (tempfile::TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

    fs::create_dir_all(root.join("src/scss/custom")).unwrap();
    fs::create_dir_all(root.join("src/js/custom")).unwrap();
    fs::write(root.join("src/scss/custom/_vars.scss"), "$accent: red;\n").unwrap();
    fs::write(
        root.join("src/scss/custom/style.scss"),
        "@import 'vars';\n.button { color: $accent; &:hover { margin: 0; } }\n",
    )
    .unwrap();
    fs::write(
        root.join("src/js/custom/app.js"),
        "document.body.classList.add('ready');\n",
    )
    .unwrap();

    (tmp, root)
}

fn pipeline(root: &Utf8PathBuf) -> Pipeline {
    let config = Config {
        root: root.clone(),
        ..Config::default()
    };
    Pipeline::from_config(config).unwrap()
}

#[test]
fn builds_every_bundle() {
    let (_tmp, root) = project();
    let pipeline = pipeline(&root);

    let diagnostics = pipeline.build().unwrap();
    assert_eq!(diagnostics.len(), 4);

    let css = fs::read_to_string(root.join("assets/css/style.css")).unwrap();
    assert!(css.contains(".button{color:red}"), "got: {css}");
    assert!(css.contains(".button:hover{margin:0}"), "got: {css}");

    let js = fs::read_to_string(root.join("assets/js/script.js")).unwrap();
    assert!(js.starts_with("document.body.classList.add('ready');\n"));
    assert!(js.ends_with("//# sourceMappingURL=script.js.map\n"));
    assert!(root.join("assets/js/script.js.map").is_file());

    // No vendor sources: the bundles exist but are empty.
    assert_eq!(fs::read(root.join("assets/css/vendor.css")).unwrap(), b"");
    assert_eq!(fs::read(root.join("assets/js/vendor.js")).unwrap(), b"");
}

#[test]
fn rebuild_is_byte_identical() {
    let (_tmp, root) = project();
    let pipeline = pipeline(&root);

    let outputs = [
        "assets/css/style.css",
        "assets/css/vendor.css",
        "assets/js/script.js",
        "assets/js/script.js.map",
        "assets/js/vendor.js",
    ];

    pipeline.build().unwrap();
    let first: Vec<_> = outputs.iter().map(|p| fs::read(root.join(p)).unwrap()).collect();

    let diagnostics = pipeline.build().unwrap();
    let second: Vec<_> = outputs.iter().map(|p| fs::read(root.join(p)).unwrap()).collect();

    assert_eq!(first, second);
    assert_eq!(diagnostics.written().count(), 0, "unchanged bundles were rewritten");
}

#[test]
fn failing_task_keeps_other_bundles() {
    let (_tmp, root) = project();
    let pipeline = pipeline(&root);
    pipeline.build().unwrap();
    let before = fs::read(root.join("assets/css/style.css")).unwrap();

    fs::write(root.join("src/scss/custom/style.scss"), ".a { color: $nope; }").unwrap();
    fs::write(root.join("src/js/custom/more.js"), "console.log(1);\n").unwrap();

    let err = pipeline.run(Mode::Build).unwrap_err();
    assert!(matches!(err, kiln::KilnError::Build(ref f) if f.task == "style-custom"));

    // The stylesheet is untouched, its sibling in the same stage still ran.
    assert_eq!(fs::read(root.join("assets/css/style.css")).unwrap(), before);
    let js = fs::read_to_string(root.join("assets/js/script.js")).unwrap();
    assert!(js.contains("console.log(1);"));
}

#[test]
fn vendor_scripts_come_first_in_path_order() {
    let (_tmp, root) = project();
    fs::create_dir_all(root.join("src/js/vendor")).unwrap();
    fs::write(root.join("src/js/vendor/b.js"), "var b = 2;").unwrap();
    fs::write(root.join("src/js/vendor/a.js"), "var a = 1;").unwrap();

    pipeline(&root).build().unwrap();

    let vendor = fs::read_to_string(root.join("assets/js/vendor.js")).unwrap();
    let a = vendor.find("var a").unwrap();
    let b = vendor.find("var b").unwrap();
    assert!(a < b);
}
