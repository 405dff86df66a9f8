//! Example driving a small plugin against the in-memory host.
//!
//! Registers a key mapping, a user command and a buffer listener, then
//! plays the part of the editor: pressing the key, running the command and
//! reporting a change. Everything the plugin logs is mirrored into a log
//! buffer, which is printed at the end.
//!
//! Run with: `cargo run --example headless`
//! Set `RUST_LOG=vpe=debug` to see dispatch tracing.

use std::rc::Rc;

use vpe::{
    CommandOptions, Error, FakeHost, ListenerOptions, MapOptions, Mode, Nargs, Object, Session,
    Value, target,
};

fn main() -> Result<(), Error> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "vpe=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let host = Rc::new(FakeHost::with_lines(&["alpha", "beta", "gamma"]));
    let session = Session::new(Rc::clone(&host));
    session.install()?;
    session.create_log_buffer()?;

    // Uppercase the cursor line.
    let shout = target(|session, _| {
        let window = session.current_window()?;
        let (line, _) = window.cursor(session)?;
        let buffer = window.buffer(session)?;
        let index = isize::try_from(line - 1).unwrap_or_default();
        let text = buffer.line(session, index)?;
        buffer.set_line(session, index, &text.to_uppercase())?;
        session.log_message(&format!("shouted line {line}"));
        Ok(Object::None)
    });
    session.map(Mode::Normal, "<leader>u", &shout, MapOptions::new())?;

    // :Count reports the number of lines, with an optional label.
    let count = target(|session, args| {
        let label = args
            .get(1)
            .and_then(Object::as_text)
            .unwrap_or("lines")
            .to_string();
        let total = session.current_buffer()?.len(session)?;
        session.log_message(&format!("{total} {label}"));
        Ok(Object::None)
    });
    session.define_command(
        "Count",
        &count,
        CommandOptions::new().with_nargs(Nargs::Optional),
    )?;

    let on_change = target(|session, args| {
        if let Some(changes) = args.changes() {
            for change in changes {
                session.log_message(&format!("change: {change:?}"));
            }
        }
        Ok(Object::None)
    });
    let buffer = session.current_buffer()?;
    let listener = buffer.add_listener(&session, &on_change, ListenerOptions::new())?;

    host.press(&session, Mode::Normal, "<leader>u");
    host.run_command(&session, "Count", false, &["rows"]);
    let change = Value::Dict(
        [
            ("lnum", Value::Int(1)),
            ("end", Value::Int(2)),
            ("added", Value::Int(0)),
            ("col", Value::Int(1)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
    );
    host.fire_listener(
        &session,
        listener.listener_id(),
        1,
        2,
        0,
        Value::List(vec![change]),
    );
    listener.stop(&session);

    for line in buffer.lines(&session)? {
        println!("buffer: {line}");
    }
    if let Some(log) = session.log_buffer() {
        for line in log.lines(&session)? {
            println!("log: {line}");
        }
    }
    Ok(())
}
