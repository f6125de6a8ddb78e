//! Callback registry dispatch semantics, driven through the public
//! handler entry points without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use slirc_client::{Batch, Config, Connection, Message};

fn connection() -> Arc<Connection> {
    Connection::new(Config::default()).expect("default config is valid")
}

fn recorder(
    log: &Arc<Mutex<Vec<String>>>,
    entry: &str,
) -> impl Fn(&Connection, &Message) + Send + Sync + 'static {
    let log = log.clone();
    let entry = entry.to_owned();
    move |_conn, _msg| log.lock().unwrap().push(entry.clone())
}

#[test]
fn test_handlers_run_in_registration_order() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    conn.add_callback("PRIVMSG", recorder(&log, "first"));
    conn.add_callback("PRIVMSG", recorder(&log, "second"));
    conn.add_callback("privmsg", recorder(&log, "third"));

    conn.handle_message(Message::with_params("PRIVMSG", ["#chan", "hi"]));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_remove_removes_exactly_one() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    let keep = conn.add_callback("NOTICE", recorder(&log, "keep"));
    let drop_me = conn.add_callback("NOTICE", recorder(&log, "drop"));
    conn.remove_callback(&drop_me);

    conn.handle_message(Message::with_params("NOTICE", ["*", "x"]));
    assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    assert_ne!(keep, drop_me);
}

#[test]
fn test_replace_applies_to_next_dispatch() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    let id = conn.add_callback("TOPIC", recorder(&log, "old"));
    conn.handle_message(Message::with_params("TOPIC", ["#chan", "t"]));

    assert!(conn.replace_callback(&id, recorder(&log, "new")));
    conn.handle_message(Message::with_params("TOPIC", ["#chan", "t"]));

    assert_eq!(*log.lock().unwrap(), vec!["old", "new"]);
}

#[test]
fn test_clear_callback() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    conn.add_callback("JOIN", recorder(&log, "a"));
    conn.add_callback("JOIN", recorder(&log, "b"));
    conn.clear_callback("join");

    conn.handle_message(Message::with_params("JOIN", ["#chan"]));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_connect_callback_twins_share_one_id() {
    let conn = connection();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();

    let id = conn.add_connect_callback(move |_conn, _msg| {
        hits2.fetch_add(1, Ordering::SeqCst);
    });

    conn.handle_message(Message::with_params("376", ["nick", "End of /MOTD"]));
    conn.handle_message(Message::with_params("422", ["nick", "No MOTD"]));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // one removal takes out both registrations
    conn.remove_callback(&id);
    conn.handle_message(Message::with_params("376", ["nick", "End of /MOTD"]));
    conn.handle_message(Message::with_params("422", ["nick", "No MOTD"]));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panic_in_handler_does_not_stop_dispatch() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    conn.add_callback("KICK", |_conn, _msg| panic!("handler exploded"));
    conn.add_callback("KICK", recorder(&log, "survivor"));

    conn.handle_message(Message::with_params("KICK", ["#chan", "victim"]));
    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);

    // subsequent messages still dispatch
    conn.handle_message(Message::with_params("KICK", ["#chan", "victim"]));
    assert_eq!(*log.lock().unwrap(), vec!["survivor", "survivor"]);
}

#[test]
fn test_unknown_commands_dispatch_by_name() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));

    conn.add_callback("WEIRDCMD", recorder(&log, "weird"));
    conn.handle_message(Message::with_params("WEIRDCMD", ["x"]));
    assert_eq!(*log.lock().unwrap(), vec!["weird"]);
}

fn batch_of(messages: &[Message]) -> Batch {
    Batch {
        message: Message::with_params("BATCH", ["+ref", "netsplit"]),
        items: messages.iter().cloned().map(Batch::single).collect(),
    }
}

#[test]
fn test_batch_flattening_preserves_order() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        conn.add_callback("PRIVMSG", move |_conn, msg| {
            log.lock()
                .unwrap()
                .push(msg.last_param().unwrap_or_default().to_owned());
        });
    }

    let mut batch = batch_of(&[
        Message::with_params("PRIVMSG", ["#chan", "one"]),
        Message::with_params("PRIVMSG", ["#chan", "two"]),
    ]);
    // nest a batch between the leaves
    batch.items.insert(
        1,
        batch_of(&[Message::with_params("PRIVMSG", ["#chan", "nested"])]),
    );

    conn.handle_batch(&batch);
    assert_eq!(*log.lock().unwrap(), vec!["one", "nested", "two"]);
}

#[test]
fn test_batch_handler_consumes_before_flattening() {
    let conn = connection();
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        conn.add_callback("PRIVMSG", move |_conn, msg| {
            log.lock()
                .unwrap()
                .push(msg.last_param().unwrap_or_default().to_owned());
        });
    }

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        conn.add_batch_callback(move |_conn, _batch| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });
    }
    // registered after the consumer, so it must never run
    let starved = Arc::new(AtomicUsize::new(0));
    {
        let starved = starved.clone();
        conn.add_batch_callback(move |_conn, _batch| {
            starved.fetch_add(1, Ordering::SeqCst);
            true
        });
    }

    conn.handle_batch(&batch_of(&[Message::with_params("PRIVMSG", ["#chan", "x"])]));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(starved.load(Ordering::SeqCst), 0);
    assert!(log.lock().unwrap().is_empty(), "consumed batch must not flatten");
}

#[test]
fn test_batch_handler_removed_by_id() {
    let conn = connection();
    let hits = Arc::new(AtomicUsize::new(0));
    let id = {
        let hits = hits.clone();
        conn.add_batch_callback(move |_conn, _batch| {
            hits.fetch_add(1, Ordering::SeqCst);
            true
        })
    };
    conn.remove_callback(&id);

    conn.handle_batch(&batch_of(&[]));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_send_while_disconnected() {
    let conn = connection();
    let err = conn.send("PRIVMSG", &["#chan", "hello"]).unwrap_err();
    assert!(matches!(err, slirc_client::ClientError::Disconnected));
}
