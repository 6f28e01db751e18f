//! Kind classification and command table integration tests.

use machina_core::{classify, CommandDescriptor, CommandTable, Kind, Kinded};
use rstest::rstest;

struct Undeclared;
impl Kinded for Undeclared {}

// ---------------------------------------------------------------------------
// 1. Predicates
// ---------------------------------------------------------------------------

#[rstest]
#[case(Kind::empty(), false, false, false, false, true)]
#[case(Kind::DONT_FORK, true, false, false, false, true)]
#[case(Kind::DAEMON, false, true, false, false, false)]
#[case(Kind::HIDDEN, false, false, true, false, false)]
#[case(Kind::CANT_PIPE, false, false, false, true, true)]
#[case(Kind::DAEMON | Kind::HIDDEN, false, true, true, false, false)]
#[case(Kind::DONT_FORK | Kind::CANT_PIPE, true, false, false, true, true)]
fn predicates_are_bitwise_tests(
    #[case] kind: Kind,
    #[case] dont_fork: bool,
    #[case] daemon: bool,
    #[case] hidden: bool,
    #[case] cant_pipe: bool,
    #[case] interactive: bool,
) {
    assert_eq!(kind.is_dont_fork(), dont_fork, "{kind} dont_fork");
    assert_eq!(kind.is_daemon(), daemon, "{kind} daemon");
    assert_eq!(kind.is_hidden(), hidden, "{kind} hidden");
    assert_eq!(kind.is_cant_pipe(), cant_pipe, "{kind} cant_pipe");
    assert_eq!(kind.is_interactive(), interactive, "{kind} interactive");
}

#[test]
fn command_without_kind_is_zero() {
    assert_eq!(classify(&Undeclared).bits(), 0);
}

#[test]
fn descriptor_classifies_by_its_kind_field() {
    let descriptor = CommandDescriptor::new("machined", "machined").with_kind(Kind::DAEMON);
    assert_eq!(classify(&descriptor), Kind::DAEMON);
}

// ---------------------------------------------------------------------------
// 2. Command table listings
// ---------------------------------------------------------------------------

#[test]
fn interactive_listing_excludes_daemons_and_hidden() {
    let mut table = CommandTable::new();
    table
        .plot(CommandDescriptor::new("get", "get KEY").with_apropos("print an attribute"))
        .expect("plot get");
    table
        .plot(CommandDescriptor::new("machined", "machined").with_kind(Kind::DAEMON))
        .expect("plot machined");
    table
        .plot(CommandDescriptor::new("daemon-run", "daemon-run NAME").with_kind(Kind::HIDDEN))
        .expect("plot daemon-run");

    let names: Vec<_> = table.interactive().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, vec!["get"]);
    assert_eq!(table.len(), 3);
}

#[test]
fn descriptor_yaml_defaults_kind_and_level() {
    let descriptor: CommandDescriptor =
        serde_yaml::from_str("name: get\nusage: get KEY\n").expect("parse");
    assert_eq!(descriptor.kind, Kind::empty());
    assert_eq!(descriptor.level, 0);
    assert!(descriptor.apropos.is_none());
}
