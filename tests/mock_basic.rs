use std::time::Duration;

use serverquery::error::ErrorKind;
use serverquery::mock::{MockReply, MockScript, MockServer};
use serverquery::types::{ClientType, ReasonId};
use serverquery::{CallOptions, CancelToken, Client, Notify};

#[tokio::test]
async fn client_can_run_commands_and_receive_events() -> serverquery::Result<()> {
    let script = MockScript::new()
        .reply_ok(
            "whoami",
            ["virtualserver_status=online virtualserver_id=1 client_id=7 client_nickname=serveradmin"],
        )
        .post_notify(
            "notifycliententerview cfid=0 ctid=1 reasonid=0 clid=5 client_nickname=bob\\sthe\\sbuilder client_type=0 client_servergroups=6,8",
        );

    let server = MockServer::start_tcp(script).await?;
    let client = Client::connect(server.endpoint().expect("tcp endpoint")).await?;

    let mut events = client.notifications();
    let whoami = client.command("whoami").await?.check()?;
    let record = whoami.first().expect("whoami record");
    assert_eq!(record.int("client_id"), Some(7));
    assert_eq!(record.text("virtualserver_status"), Some("online"));

    let Notify::ClientEnterView(view) = events.recv().await? else {
        panic!("expected cliententerview");
    };
    assert_eq!(view.clid, 5);
    assert_eq!(view.client_nickname, "bob the builder");
    assert_eq!(view.client_type, ClientType::Voice);
    assert_eq!(view.server_groups(), [6, 8]);

    client.close().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn replies_pair_with_commands_in_order() -> serverquery::Result<()> {
    let mut script = MockScript::new();
    for n in 0..8 {
        script = script.reply_ok(format!("clientinfo clid={n}"), [format!("clid={n}")]);
    }

    let (server, transport) = MockServer::duplex(script);
    let client = Client::builder().connect_transport(transport).await?;

    let mut calls = Vec::new();
    for n in 0..8 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let resp = client.command(&format!("clientinfo clid={n}")).await?;
            serverquery::Result::Ok((n, resp.check()?))
        }));
    }

    for call in calls {
        let (n, msg) = call.await.expect("join")?;
        assert_eq!(msg.first().and_then(|r| r.int("clid")), Some(n));
    }
    assert_eq!(server.received().len(), 8);

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn multi_line_bodies_and_lists_decode() -> serverquery::Result<()> {
    let script = MockScript::new()
        .reply_ok(
            "channellist",
            [
                "cid=1 pid=0 channel_name=Default\\sChannel",
                "cid=2 pid=0 channel_name=AFK",
                "cid=3 pid=2 channel_name=Deep\\pSleep",
            ],
        )
        .reply_ok("clientlist", ["clid=1 cid=1|clid=2 cid=3"]);

    let (_server, transport) = MockServer::duplex(script);
    let client = Client::builder().connect_transport(transport).await?;

    let channels = client.command("channellist").await?.check()?;
    assert_eq!(channels.records().len(), 3);
    assert_eq!(channels.records()[0].text("channel_name"), Some("Default\\sChannel"));
    assert_eq!(channels.records()[2].int("pid"), Some(2));

    let clients = client.command("clientlist").await?.check()?;
    let rows = clients.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].int("cid"), Some(3));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn server_errors_are_data_until_checked() -> serverquery::Result<()> {
    let script = MockScript::new().reply_error("clientinfo", 512, "invalid clientID");
    let (_server, transport) = MockServer::duplex(script);
    let client = Client::builder().connect_transport(transport).await?;

    let resp = client.command("clientinfo clid=99").await?;
    assert!(!resp.is_ok());
    assert_eq!(resp.error.id, 512);
    assert_eq!(resp.error.msg, "invalid clientID");

    let err = resp.check().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);

    let resp = client.command("nosuchcommand").await?;
    assert_eq!(resp.error.id, 256);

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn left_view_tolerates_extra_fields() -> serverquery::Result<()> {
    let (server, transport) = MockServer::duplex(MockScript::new());
    let client = Client::builder().connect_transport(transport).await?;
    let mut events = client.notifications();

    server
        .push("notifyclientleftview cfid=1 ctid=0 reasonid=8 reasonmsg=leaving clid=4 brand_new_field=1")
        .await?;

    let Notify::ClientLeftView(left) = events.recv().await? else {
        panic!("expected clientleftview");
    };
    assert_eq!(left.clid, 4);
    assert_eq!(left.reasonid, ReasonId::LeftServer);
    assert_eq!(left.reasonmsg, "leaving");

    server.push("notifytextmessage targetmode=3 msg=hi").await?;
    let ev = events.recv().await?;
    assert_eq!(ev.event(), "notifytextmessage");
    assert!(ev.kind().is_none());

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn banner_mismatch_fails_cleanly() -> serverquery::Result<()> {
    let bad = MockServer::start_tcp(MockScript::new().banner("SSH-2.0-OpenSSH_9.6")).await?;
    let err = Client::connect(bad.endpoint().expect("tcp endpoint"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    bad.shutdown().await;

    let good = MockServer::start_tcp(MockScript::new()).await?;
    let client = tokio::time::timeout(
        Duration::from_secs(5),
        Client::connect(good.endpoint().expect("tcp endpoint")),
    )
    .await
    .expect("second connect must not hang")?;
    client.close().await?;
    good.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn login_and_server_selection() -> serverquery::Result<()> {
    let script = MockScript::new()
        .reply_ok("login serveradmin pass\\sword", Vec::<String>::new())
        .reply_ok("use sid=3", Vec::<String>::new());
    let (server, transport) = MockServer::duplex(script);

    let client = Client::builder()
        .login("serveradmin", "pass word")
        .virtual_server(3)
        .connect_transport(transport)
        .await?;

    assert_eq!(
        server.received(),
        ["login serveradmin pass\\sword", "use sid=3"]
    );

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn rejected_login_fails_connect() {
    let script = MockScript::new().reply_error("login", 520, "invalid loginname or password");
    let (_server, transport) = MockServer::duplex(script);

    let err = Client::builder()
        .login("serveradmin", "wrong")
        .connect_transport(transport)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert!(err.to_string().contains("520"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn timed_out_reply_is_not_handed_to_the_next_call() -> serverquery::Result<()> {
    let script = MockScript::new().reply(
        "serverinfo",
        MockReply::ok(["virtualserver_name=slow"]).delayed(Duration::from_secs(30)),
    );
    let (_server, transport) = MockServer::duplex(script);
    let client = Client::builder().connect_transport(transport).await?;

    let err = client
        .command_with_options(
            "serverinfo",
            CallOptions {
                timeout: Some(Duration::from_secs(1)),
                cancel: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let version = client.command("version").await?.check()?;
    assert_eq!(version.first().and_then(|r| r.text("platform")), Some("Linux"));

    client.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_returns_and_keeps_pairing() -> serverquery::Result<()> {
    let script = MockScript::new().reply(
        "serverinfo",
        MockReply::ok(["virtualserver_name=slow"]).delayed(Duration::from_secs(30)),
    );
    let (_server, transport) = MockServer::duplex(script);
    let client = Client::builder().connect_transport(transport).await?;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let err = client
        .command_with_options(
            "serverinfo",
            CallOptions {
                timeout: None,
                cancel: Some(cancel),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let version = client.command("version").await?.check()?;
    assert!(version.first().and_then(|r| r.text("version")).is_some());

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn multi_line_command_is_rejected() -> serverquery::Result<()> {
    let (server, transport) = MockServer::duplex(MockScript::new());
    let client = Client::builder().connect_transport(transport).await?;

    let err = client.command("version\nquit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(server.received().is_empty());

    client.command("version").await?.check()?;
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_final() -> serverquery::Result<()> {
    let (_server, transport) = MockServer::duplex(MockScript::new());
    let client = Client::builder().connect_transport(transport).await?;
    let mut events = client.notifications();

    client.close().await?;
    client.close().await?;
    assert!(client.is_closed());

    let err = client.command("version").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
    assert_eq!(events.recv().await.unwrap_err().kind(), ErrorKind::Disconnected);
    Ok(())
}

#[tokio::test]
async fn lost_link_fails_pending_and_later_calls() -> serverquery::Result<()> {
    let (server, transport) = MockServer::duplex(MockScript::new());
    let client = Client::builder().connect_transport(transport).await?;

    server.shutdown().await;

    // Either the hang-up or the failed write is noticed first.
    let err = client.command("version").await.unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::Disconnected | ErrorKind::Transport),
        "{err}"
    );
    assert!(client.is_closed());
    Ok(())
}
