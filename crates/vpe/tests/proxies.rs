//! Integration tests for the proxy wrappers, temporary state and the log.

#![allow(clippy::expect_used)]

use std::rc::Rc;

use vpe::{FakeHost, Object, Session, SessionConfig, TemporaryState};

#[test]
fn wrappers_keep_identity_and_local_store() {
    let host = Rc::new(FakeHost::with_lines(&["a"]));
    let session = Session::new(Rc::clone(&host));

    let buffer = session.current_buffer().expect("buffer");
    buffer.store().insert("seen", Object::Bool(true));
    assert_eq!(session.wrap_buffer(1), buffer);
    assert_eq!(
        session.wrap_buffer(1).store().get("seen"),
        Some(Object::Bool(true))
    );

    let original = session.current_window().expect("window");
    let split = session.wrap_window_id(host.split_window());
    assert_ne!(split, original);
    assert_eq!(session.current_window().expect("window"), split);
    assert_eq!(original.number(&session).expect("number"), 2);

    let tab = session.current_tabpage().expect("tab page");
    assert_eq!(tab.windows(&session).expect("windows").len(), 2);
}

#[test]
fn list_option_arithmetic_round_trips() {
    let session = Session::new(FakeHost::new());
    let options = session.options();
    let whichwrap = options
        .list_option(&session, "whichwrap")
        .expect("list option");
    options
        .set(&session, "whichwrap", whichwrap + "h,l")
        .expect("set");
    assert_eq!(
        options
            .get(&session, "whichwrap")
            .expect("get")
            .as_text(),
        Some("b,s,h,l")
    );
}

#[test]
fn temporary_variables_restore_on_scope_exit() {
    let session = Session::new(FakeHost::new());
    let vars = session.vars();
    {
        let mut state = TemporaryState::with_presets(&session, vars, [("a", Object::Int(1))])
            .expect("presets");
        assert_eq!(vars.get(&session, "a").expect("get"), Some(Object::Int(1)));
        state.set("a", 2_i64).expect("set");
        assert_eq!(state.get("a").expect("get"), Object::Int(2));
    }
    assert_eq!(vars.get(&session, "a").expect("get"), None);
}

#[test]
fn buffer_edits_respect_modifiable() {
    let session = Session::new(FakeHost::with_lines(&["one", "two"]));
    let buffer = session.current_buffer().expect("buffer");
    buffer.options().set(&session, "modifiable", false).expect("set");
    assert!(buffer.append(&session, &["three"]).is_err());
    {
        let _guard = session.temp_modifiable(&buffer).expect("guard");
        buffer.append(&session, &["three"]).expect("append");
    }
    assert_eq!(
        buffer.lines(&session).expect("lines"),
        vec!["one", "two", "three"]
    );
    assert_eq!(
        buffer.options().get(&session, "modifiable").expect("get"),
        Object::Bool(false)
    );
}

#[test]
fn log_buffer_mirrors_messages() {
    let session = Session::builder(FakeHost::new())
        .with_config(SessionConfig::new().with_log_maxlen(2))
        .build();
    session.log_message("before");
    let log = session.create_log_buffer().expect("log buffer");
    assert_eq!(log.name(&session).expect("name"), "[VPE log]");
    assert_eq!(log.lines(&session).expect("lines"), session.log_lines());

    session.log_message("after\nmore");
    let lines = log.lines(&session).expect("lines");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(": after"));
    assert_eq!(lines[1], "         more");
}

#[test]
fn log_buffer_tracks_messages_longer_than_the_limit() {
    let session = Session::builder(FakeHost::new())
        .with_config(SessionConfig::new().with_log_maxlen(2))
        .build();
    session.log_message("before");
    let log = session.create_log_buffer().expect("log buffer");
    for _ in 0..3 {
        session.log_message("a\nb\nc");
        assert_eq!(log.lines(&session).expect("lines"), session.log_lines());
    }
    assert_eq!(
        session.log_lines(),
        vec!["         b".to_string(), "         c".to_string()]
    );
}
