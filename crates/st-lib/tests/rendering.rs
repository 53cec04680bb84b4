use st_lib::{Group, Value};

fn template(src: &str, name: &str) -> st_lib::ST {
    Group::from_string(src).unwrap().get_instance_of(name).unwrap()
}

#[test]
fn simple_interpolation() {
    let hi = template(r#"hi(name) ::= "hello <name>!""#, "/hi");
    hi.add("name", "Ada");
    assert_eq!(hi.render(), "hello Ada!");
}

#[test]
fn iteration_with_separator() {
    let list = template(r#"list(xs) ::= "<xs; separator=\", \">""#, "/list");
    list.add("xs", Value::list(vec![Value::str("a"), Value::str("b"), Value::str("c")]));
    assert_eq!(list.render(), "a, b, c");
}

#[test]
fn map_with_anonymous_sub_template() {
    let bullets = template(r#"bullets(xs) ::= "<xs:{x|* <x>\n}>""#, "/bullets");
    bullets.add("xs", Value::list(vec![Value::str("one"), Value::str("two")]));
    assert_eq!(bullets.render(), "* one\n* two\n");
}

#[test]
fn conditional_with_else() {
    let src = r#"g(b) ::= "<if(b)>yes<else>no<endif>""#;

    let yes = template(src, "/g");
    yes.add("b", true);
    assert_eq!(yes.render(), "yes");

    let no = template(src, "/g");
    no.add("b", false);
    assert_eq!(no.render(), "no");

    let null_is_false = template(src, "/g");
    null_is_false.add("b", Value::Null);
    assert_eq!(null_is_false.render(), "no");
}

#[test]
fn auto_indent_of_nested_template() {
    let group = Group::from_string(
        "outer() ::= <<\nprefix:\n    <inner()>\n>>\ninner() ::= \"a\\nb\"",
    )
    .unwrap();
    let outer = group.get_instance_of("/outer").unwrap();
    assert_eq!(outer.render(), "prefix:\n    a\n    b");
}

#[test]
fn zip_map() {
    let z = template(r#"z(ns,vs) ::= "<ns,vs:{n,v|<n>=<v>}; separator=\",\">""#, "/z");
    z.add("ns", Value::list(vec![Value::str("x"), Value::str("y")]));
    z.add("vs", Value::list(vec![Value::Int(1), Value::Int(2)]));
    assert_eq!(z.render(), "x=1,y=2");
}

#[test]
fn pure_text_identity() {
    let t = template(r#"t() ::= "just plain text, no expressions""#, "/t");
    assert_eq!(t.render(), "just plain text, no expressions");
}

#[test]
fn escape_round_trip() {
    let t = template(r#"t() ::= "\< \\ \}""#, "/t");
    assert_eq!(t.render(), "< \\ }");
}

#[test]
fn separator_law_skips_null_elements() {
    let t = template(r#"t(xs) ::= "<xs; separator=\"-\">""#, "/t");
    t.add("xs", Value::list(vec![Value::str("a"), Value::Null, Value::str("b")]));
    assert_eq!(t.render(), "a-b");
}

#[test]
fn null_attribute_renders_with_configured_null_string() {
    let t = template(r#"t(xs) ::= "<xs; null=\"N/A\", separator=\",\">""#, "/t");
    t.add("xs", Value::list(vec![Value::str("a"), Value::Null]));
    assert_eq!(t.render(), "a,N/A");
}

#[test]
fn default_argument_is_evaluated_only_when_unbound() {
    let group = Group::from_string(r#"greet(name, punct="!") ::= "hi <name><punct>""#).unwrap();

    let bound = group.get_instance_of("/greet").unwrap();
    bound.add("name", "Ada");
    bound.add("punct", "?");
    assert_eq!(bound.render(), "hi Ada?");

    let defaulted = group.get_instance_of("/greet").unwrap();
    defaulted.add("name", "Grace");
    assert_eq!(defaulted.render(), "hi Grace!");
}

#[test]
fn scope_isolation_across_instances_of_the_same_template() {
    let group = Group::from_string(r#"t(x) ::= "<x>""#).unwrap();
    let a = group.get_instance_of("/t").unwrap();
    let b = group.get_instance_of("/t").unwrap();
    a.add("x", "first");
    b.add("x", "second");
    assert_eq!(a.render(), "first");
    assert_eq!(b.render(), "second");
}

#[test]
fn resolution_precedence_favors_the_importing_group() {
    let base = Group::from_string(r#"greeting() ::= "base""#).unwrap();
    let overlay = Group::from_string(r#"greeting() ::= "overlay""#).unwrap();
    overlay.import(base);

    let st = overlay.get_instance_of("/greeting").unwrap();
    assert_eq!(st.render(), "overlay");
}
