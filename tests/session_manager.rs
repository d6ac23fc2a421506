mod common;

use common::{attach_engine, start_manager, wait_for_session_ended, MockEngine, WAIT};
use dbgp_mcp::daemon::ManagerEvent;
use dbgp_mcp::dbgp::SessionStatus;
use dbgp_mcp::Error;

#[tokio::test(flavor = "multi_thread")]
async fn test_attach_registers_session_with_init() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    let (_engine, session_id) = attach_engine(addr, &mut events, "file:///srv/index.php").await;
    assert_eq!(session_id, "sess-1");

    let session = manager.get(&session_id).expect("session not registered");
    assert_eq!(session.init().file_uri, "file:///srv/index.php");
    assert_eq!(session.init().ide_key, "mcp-test");
    assert_eq!(session.init().language, "PHP");
    assert_eq!(session.status(), SessionStatus::Starting);
    assert_eq!(manager.list().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_to_break_updates_state() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();
    let (mut engine, session_id) = attach_engine(addr, &mut events, "file:///a.x").await;

    let session = manager.get(&session_id).unwrap();
    let run_task = tokio::spawn({
        let session = session.clone();
        async move { session.run().await }
    });

    let cmd = engine.recv_command().await;
    assert_eq!(cmd.name, "run");
    engine
        .send_frame(&format!(
            r#"<response command="run" transaction_id="{}" status="break" reason="ok"><xdebug:message filename="file:///a.x" lineno="5"/></response>"#,
            cmd.tx_id
        ))
        .await;

    let result = run_task.await.unwrap().unwrap();
    assert_eq!(result.status, SessionStatus::Break);
    assert_eq!(result.filename.as_deref(), Some("file:///a.x"));
    assert_eq!(result.lineno, Some(5));

    // The state change fans out to subscribers and lands in session state.
    let change = tokio::time::timeout(WAIT, async {
        loop {
            if let ManagerEvent::StateChange {
                session_id,
                status,
                filename,
                lineno,
            } = events.recv().await.unwrap()
            {
                return (session_id, status, filename, lineno);
            }
        }
    })
    .await
    .expect("no stateChange event");
    assert_eq!(change.0, session_id);
    assert_eq!(change.1, SessionStatus::Break);
    assert_eq!(change.2.as_deref(), Some("file:///a.x"));
    assert_eq!(change.3, Some(5));

    assert_eq!(session.status(), SessionStatus::Break);
    let snap = session.state_snapshot();
    assert_eq!(snap.current_file.as_deref(), Some("file:///a.x"));
    assert_eq!(snap.current_line, Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_election_prefers_break_then_creation_order() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    let (_engine1, id1) = attach_engine(addr, &mut events, "file:///one.php").await;
    let (mut engine2, id2) = attach_engine(addr, &mut events, "file:///two.php").await;

    // Drive the second session to a break.
    let session2 = manager.get(&id2).unwrap();
    let run_task = tokio::spawn({
        let session2 = session2.clone();
        async move { session2.run().await }
    });
    let cmd = engine2.recv_command().await;
    engine2
        .send_frame(&format!(
            r#"<response command="run" transaction_id="{}" status="break" reason="ok"><xdebug:message filename="file:///two.php" lineno="7"/></response>"#,
            cmd.tx_id
        ))
        .await;
    run_task.await.unwrap().unwrap();

    // Wait for the pump to apply the status before electing.
    tokio::time::timeout(WAIT, async {
        loop {
            if session2.status() == SessionStatus::Break {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // No explicit set_active: the broken session wins over the older one.
    let active = manager.active_session().unwrap();
    assert_eq!(active.id(), id2);

    // When it goes away, election falls back to creation order.
    drop(engine2);
    let ended = wait_for_session_ended(&mut events).await;
    assert_eq!(ended, id2);
    let active = manager.active_session().unwrap();
    assert_eq!(active.id(), id1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_active_overrides_election() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    let (_engine1, id1) = attach_engine(addr, &mut events, "file:///one.php").await;
    let (_engine2, id2) = attach_engine(addr, &mut events, "file:///two.php").await;

    manager.set_active(&id2).unwrap();
    assert_eq!(manager.active_session().unwrap().id(), id2);

    manager.set_active(&id1).unwrap();
    assert_eq!(manager.active_session().unwrap().id(), id1);

    assert!(matches!(
        manager.set_active("sess-99"),
        Err(Error::SessionNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_breakpoint_applied_on_attach() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    // Breakpoint requested before any engine exists.
    let pending = manager
        .pending()
        .add_line("/x/y.s", 10, Some("$a > 1".to_string()));
    assert!(pending.id.starts_with("pending_"));

    let mut engine = MockEngine::connect(addr).await;
    engine.send_init("file:///x/y.s", "mcp-test").await;
    engine.auto_negotiate().await;

    // After negotiation the pending intent is replayed.
    let cmd = engine.recv_command().await;
    assert_eq!(cmd.name, "breakpoint_set");
    assert_eq!(cmd.arg("t"), Some("conditional"));
    assert_eq!(cmd.arg("f"), Some("file:///x/y.s"));
    assert_eq!(cmd.arg("n"), Some("10"));
    assert_eq!(cmd.data.as_deref(), Some("$a > 1"));
    engine
        .send_frame(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}" id="90001" resolved="resolved"/>"#,
            cmd.tx_id
        ))
        .await;

    let session_id = common::wait_for_session_created(&mut events).await;
    let mappings = manager.pending().mappings_for_session(&session_id);
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].pending_id, pending.id);
    assert_eq!(mappings[0].engine_breakpoint_id, "90001");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_persists_across_sessions() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    manager.pending().add_line("/x/y.php", 3, None);
    let disabled = manager.pending().add_line("/x/z.php", 9, None);
    manager.pending().set_enabled(&disabled.id, false);

    // First session: only the enabled entry is installed.
    let mut engine1 = MockEngine::connect(addr).await;
    engine1.send_init("file:///x/y.php", "mcp-test").await;
    engine1.auto_negotiate().await;
    let cmd = engine1.recv_command().await;
    assert_eq!(cmd.name, "breakpoint_set");
    assert_eq!(cmd.arg("t"), Some("line"));
    assert_eq!(cmd.arg("n"), Some("3"));
    engine1
        .send_frame(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}" id="50" resolved="resolved"/>"#,
            cmd.tx_id
        ))
        .await;
    let id1 = common::wait_for_session_created(&mut events).await;
    assert_eq!(manager.pending().mappings_for_session(&id1).len(), 1);

    // Session ends: its mapping is dropped, the intent survives.
    drop(engine1);
    wait_for_session_ended(&mut events).await;
    assert!(manager.pending().mappings_for_session(&id1).is_empty());
    assert_eq!(manager.pending().list().len(), 2);

    // Second session gets the same replay.
    let mut engine2 = MockEngine::connect(addr).await;
    engine2.send_init("file:///x/y.php", "mcp-test").await;
    engine2.auto_negotiate().await;
    let cmd = engine2.recv_command().await;
    assert_eq!(cmd.name, "breakpoint_set");
    assert_eq!(cmd.arg("n"), Some("3"));
    engine2
        .send_frame(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}" id="51" resolved="resolved"/>"#,
            cmd.tx_id
        ))
        .await;
    let id2 = common::wait_for_session_created(&mut events).await;
    let mappings = manager.pending().mappings_for_session(&id2);
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].engine_breakpoint_id, "51");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_apply_failure_does_not_block_others() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    manager.pending().add_line("/missing.php", 1, None);
    manager.pending().add_exception("RuntimeException");

    let mut engine = MockEngine::connect(addr).await;
    engine.send_init("file:///app.php", "mcp-test").await;
    engine.auto_negotiate().await;

    // First install is rejected by the engine.
    let cmd = engine.recv_command().await;
    assert_eq!(cmd.name, "breakpoint_set");
    engine
        .send_frame(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}"><error code="100"><message>file not found</message></error></response>"#,
            cmd.tx_id
        ))
        .await;

    // The next pending entry is still attempted.
    let cmd = engine.recv_command().await;
    assert_eq!(cmd.name, "breakpoint_set");
    assert_eq!(cmd.arg("t"), Some("exception"));
    assert_eq!(cmd.arg("x"), Some("RuntimeException"));
    engine
        .send_frame(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}" id="60"/>"#,
            cmd.tx_id
        ))
        .await;

    let session_id = common::wait_for_session_created(&mut events).await;
    let mappings = manager.pending().mappings_for_session(&session_id);
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].engine_breakpoint_id, "60");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lookup_helpers() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    let (_engine1, id1) = attach_engine(addr, &mut events, "file:///srv/shop/cart.php").await;
    let (_engine2, id2) = attach_engine(addr, &mut events, "file:///srv/blog/post.php").await;

    let hits = manager.find_by_file("cart");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), id1);

    let hits = manager.find_by_file("/srv/");
    assert_eq!(hits.len(), 2);

    let hits = manager.find_by_ide_key("mcp-test");
    assert_eq!(hits.len(), 2);
    assert!(manager.find_by_ide_key("other").is_empty());

    assert!(manager.get(&id2).is_some());
    assert!(manager.get("sess-42").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_session_removes_and_reelects() {
    let (manager, addr) = start_manager().await;
    let mut events = manager.subscribe();

    let (_engine1, id1) = attach_engine(addr, &mut events, "file:///one.php").await;
    let (_engine2, id2) = attach_engine(addr, &mut events, "file:///two.php").await;
    manager.set_active(&id2).unwrap();

    manager.close_session(&id2).unwrap();
    let ended = wait_for_session_ended(&mut events).await;
    assert_eq!(ended, id2);

    assert!(manager.get(&id2).is_none());
    assert_eq!(manager.list().len(), 1);
    // The active hint re-elects onto the surviving session.
    assert_eq!(manager.active_session().unwrap().id(), id1);
}
