use std::fs;

use st_lib::Group;
use tempfile::tempdir;

#[test]
fn single_group_file_resolves_its_templates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("main.stg");
    fs::write(&path, r#"hi(name) ::= "hello <name>!""#).unwrap();

    let group = Group::from_file(&path).unwrap();
    let st = group.get_instance_of("/hi").unwrap();
    st.add("name", "Ada");
    assert_eq!(st.render(), "hello Ada!");
}

#[test]
fn directory_group_resolves_one_st_file_per_template() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("hi.st"), "(name)\nhello <name>!").unwrap();

    let group = Group::from_dir(dir.path()).unwrap();
    let st = group.get_instance_of("/hi").unwrap();
    st.add("name", "Grace");
    assert_eq!(st.render(), "hello Grace!");
}

#[test]
fn directory_group_also_loads_stg_files_at_any_depth() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("extra.stg"), r#"bye() ::= "goodbye""#).unwrap();

    let group = Group::from_dir(dir.path()).unwrap();
    let st = group.get_instance_of("/bye").unwrap();
    assert_eq!(st.render(), "goodbye");
}

#[test]
fn raw_directory_group_never_parses_a_formal_argument_header() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("literal.st"), "(x) is not a header here").unwrap();

    let group = Group::from_raw_dir(dir.path()).unwrap();
    let st = group.get_instance_of("/literal").unwrap();
    assert_eq!(st.render(), "(x) is not a header here");
}

#[test]
fn missing_group_file_path_fails_fast_on_load() {
    let missing = std::env::temp_dir().join("definitely-not-a-real-group-file.stg");
    assert!(Group::from_file(&missing).is_err());
}

#[test]
fn imports_propagate_transitively_and_defer_to_the_importer() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("base.stg"), r#"greeting() ::= "base hello""#).unwrap();
    fs::write(dir.path().join("override.stg"), r#"greeting() ::= "override hello""#).unwrap();

    let base = Group::from_file(dir.path().join("base.stg")).unwrap();
    let overlay = Group::from_file(dir.path().join("override.stg")).unwrap();
    overlay.import(base.clone());

    assert_eq!(overlay.get_instance_of("/greeting").unwrap().render(), "override hello");
    assert_eq!(base.get_instance_of("/greeting").unwrap().render(), "base hello");
}

#[test]
fn group_file_dictionary_is_readable_through_a_template() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("colors.stg"),
        r#"
        colors ::= [
            "warn": "yellow",
            default: "black"
        ]
        swatch(key) ::= "<colors.(key)>"
        "#,
    )
    .unwrap();

    let group = Group::from_file(dir.path().join("colors.stg")).unwrap();
    let warn = group.get_instance_of("/swatch").unwrap();
    warn.add("key", "warn");
    assert_eq!(warn.render(), "yellow");

    let fallback = group.get_instance_of("/swatch").unwrap();
    fallback.add("key", "info");
    assert_eq!(fallback.render(), "black");
}
